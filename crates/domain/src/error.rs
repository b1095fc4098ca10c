//! Domain error types.

use common::ReservationId;
use ledger_store::StoreError;
use thiserror::Error;

use crate::reservation::ReservationError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The reservation rejected the command.
    #[error("Reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("Reservation not found: {0}")]
    NotFound(ReservationId),

    /// Concurrent writers kept winning the compare-and-set.
    #[error("Reservation {0} is under contention, giving up")]
    Contention(ReservationId),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns the rejection reason when the aggregate refused the command.
    pub fn as_reservation_error(&self) -> Option<&ReservationError> {
        match self {
            DomainError::Reservation(e) => Some(e),
            _ => None,
        }
    }
}

//! Saga error types.

use common::{ReservationId, TxHash};
use domain::{DomainError, ReservationError, ReservationStatus};
use ledger_gateway::GatewayError;
use ledger_store::StoreError;
use thiserror::Error;

use crate::bus::BusError;
use crate::services::RemoteError;

/// Errors that can occur while running the payment saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The reservation is not in a status that allows the action.
    #[error("Invalid transition: cannot {action} from {current} state")]
    InvalidTransition {
        current: ReservationStatus,
        action: &'static str,
    },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Refund requested without a confirmed payment to refund.
    #[error("No confirmed payment for reservation {0}")]
    PaymentNotConfirmed(ReservationId),

    /// Refund and escrow release are mutually exclusive.
    #[error("Escrow for reservation {0} was already settled the other way")]
    SettlementConflict(ReservationId),

    /// No contract booking is linked to the reservation yet.
    #[error("No ledger booking linked to reservation {0}")]
    BookingNotLinked(ReservationId),

    /// The platform wallet cannot pay fees; all submissions are blocked.
    #[error("Platform fee wallet depleted: {0}")]
    FeeWalletDepleted(String),

    #[error("Unknown ledger transaction: {0}")]
    UnknownTransaction(TxHash),

    #[error("Domain error: {0}")]
    Domain(DomainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),
}

impl From<DomainError> for SagaError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NotFound(id) => SagaError::ReservationNotFound(id),
            DomainError::Reservation(ReservationError::InvalidTransition { current, action }) => {
                SagaError::InvalidTransition { current, action }
            }
            DomainError::Store(e) => SagaError::Store(e),
            other => SagaError::Domain(other),
        }
    }
}

impl SagaError {
    /// True for failures that block every submission, not just this one.
    pub fn is_operational(&self) -> bool {
        matches!(self, SagaError::FeeWalletDepleted(_))
    }

    /// True when handling the same message again may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Store(StoreError::Database(_) | StoreError::ConcurrencyConflict { .. }) => true,
            SagaError::Domain(DomainError::Contention(_)) => true,
            SagaError::Gateway(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

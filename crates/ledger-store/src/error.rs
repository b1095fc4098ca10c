use common::{BookingId, ReservationId, TransactionId, TxHash};
use thiserror::Error;

use crate::{TransactionStatus, Version};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested ledger transaction does not exist.
    #[error("Ledger transaction not found: {0}")]
    NotFound(TransactionId),

    /// The requested status change is not allowed from the row's current status.
    #[error("Ledger transaction {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// The transaction hash is already recorded on another row.
    #[error("Transaction hash {0} is already recorded")]
    DuplicateTransactionHash(TxHash),

    /// The booking is already linked to a different reservation.
    #[error("Booking {booking_id} is already linked to reservation {existing}")]
    LinkConflict {
        booking_id: BookingId,
        existing: ReservationId,
    },

    /// The reservation was written by someone else since it was loaded.
    #[error(
        "Concurrency conflict for reservation {reservation_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        reservation_id: ReservationId,
        expected: Version,
        actual: Version,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored column could not be decoded into its domain type.
    #[error("Corrupt column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Reservation aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;

pub use aggregate::Reservation;
pub use commands::*;
pub use events::{
    CancelledData, FailureData, ReservationCreatedData, ReservationEvent, SettlementData,
    TimestampData,
};
pub use service::ReservationService;
pub use state::ReservationStatus;

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur during reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// Reservation is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidTransition {
        current: ReservationStatus,
        action: &'static str,
    },

    #[error("Reservation already created")]
    AlreadyCreated,

    #[error("Invalid dates: {0}")]
    InvalidDates(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Check-in is not allowed before {date}")]
    CheckInTooEarly { date: NaiveDate },

    #[error("Check-out is not allowed before {date}")]
    CheckOutTooEarly { date: NaiveDate },

    /// Escrow can go to the host or back to the tenant, never both.
    #[error("Escrow already settled the other way")]
    SettlementConflict,
}

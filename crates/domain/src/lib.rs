//! Domain layer for the escrow payment saga.
//!
//! This crate provides:
//! - Aggregate trait for entities stored as current state plus history
//! - DomainEvent trait for transitions recorded in that history
//! - Command trait and CommandHandler with compare-and-set retries
//! - Reservation aggregate implementing the booking state machine

pub mod aggregate;
pub mod command;
pub mod error;
pub mod reservation;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use reservation::{
    CancelReservation, CancelledData, CheckIn, CheckOut, CreateReservation, FailureData,
    Reservation, ReservationCreatedData, ReservationError, ReservationEvent, ReservationService,
    ReservationStatus, SettlementData, TimestampData,
};

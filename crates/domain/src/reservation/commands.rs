//! Reservation commands.

use chrono::{DateTime, NaiveDate, Utc};
use common::{ReservationId, WalletAddress, Wei};

use crate::command::Command;

use super::Reservation;

/// Command to create a new reservation.
#[derive(Debug, Clone)]
pub struct CreateReservation {
    pub reservation_id: ReservationId,
    pub property_id: String,
    pub tenant_wallet: WalletAddress,
    pub host_wallet: WalletAddress,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,

    /// Nightly total before the platform fee.
    pub rental_amount: Wei,
}

impl CreateReservation {
    /// Creates a new CreateReservation command with a generated reservation ID.
    pub fn new(
        property_id: impl Into<String>,
        tenant_wallet: WalletAddress,
        host_wallet: WalletAddress,
        check_in_date: NaiveDate,
        check_out_date: NaiveDate,
        rental_amount: Wei,
    ) -> Self {
        Self {
            reservation_id: ReservationId::new(),
            property_id: property_id.into(),
            tenant_wallet,
            host_wallet,
            check_in_date,
            check_out_date,
            rental_amount,
        }
    }
}

impl Command for CreateReservation {
    type Aggregate = Reservation;

    fn aggregate_id(&self) -> ReservationId {
        self.reservation_id
    }
}

/// Command to check a guest in.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub reservation_id: ReservationId,
    pub at: DateTime<Utc>,
}

impl CheckIn {
    pub fn now(reservation_id: ReservationId) -> Self {
        Self {
            reservation_id,
            at: Utc::now(),
        }
    }
}

impl Command for CheckIn {
    type Aggregate = Reservation;

    fn aggregate_id(&self) -> ReservationId {
        self.reservation_id
    }
}

/// Command to check a guest out, completing the stay.
#[derive(Debug, Clone)]
pub struct CheckOut {
    pub reservation_id: ReservationId,
    pub at: DateTime<Utc>,
}

impl CheckOut {
    pub fn now(reservation_id: ReservationId) -> Self {
        Self {
            reservation_id,
            at: Utc::now(),
        }
    }
}

impl Command for CheckOut {
    type Aggregate = Reservation;

    fn aggregate_id(&self) -> ReservationId {
        self.reservation_id
    }
}

/// Command to cancel a reservation.
#[derive(Debug, Clone)]
pub struct CancelReservation {
    pub reservation_id: ReservationId,
    pub reason: String,
}

impl CancelReservation {
    pub fn new(reservation_id: ReservationId, reason: impl Into<String>) -> Self {
        Self {
            reservation_id,
            reason: reason.into(),
        }
    }
}

impl Command for CancelReservation {
    type Aggregate = Reservation;

    fn aggregate_id(&self) -> ReservationId {
        self.reservation_id
    }
}

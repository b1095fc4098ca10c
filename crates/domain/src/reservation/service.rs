//! Reservation service providing a simplified API for reservation operations.

use chrono::Utc;
use common::{FeeSchedule, ReservationId, TxHash};
use ledger_store::{EventEnvelope, ReservationStore};

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{CancelReservation, CheckIn, CheckOut, CreateReservation, Reservation, ReservationStatus};

/// Service for managing reservations.
///
/// Wraps the command handler. Guest-facing commands (create, check in,
/// check out, cancel) take command structs; settlement outcomes reported by
/// the payment saga take the ledger transaction hash directly.
pub struct ReservationService<S: ReservationStore> {
    handler: CommandHandler<S, Reservation>,
    fees: FeeSchedule,
}

impl<S: ReservationStore> ReservationService<S> {
    pub fn new(store: S) -> Self {
        Self::with_fees(store, FeeSchedule::default())
    }

    pub fn with_fees(store: S, fees: FeeSchedule) -> Self {
        Self {
            handler: CommandHandler::new(store),
            fees,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Reservation> {
        &self.handler
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Creates a new PENDING reservation priced with the platform fee.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        cmd: CreateReservation,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let fees = self.fees;
        let now = Utc::now();
        self.handler
            .execute(cmd.reservation_id, |r| r.create(&cmd, &fees, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        reservation_id: ReservationId,
        tx_hash: Option<TxHash>,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(reservation_id, |r| r.confirm_payment(tx_hash.clone(), now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_payment_failure(
        &self,
        reservation_id: ReservationId,
        reason: &str,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(reservation_id, |r| r.record_payment_failure(reason, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn request_payment_retry(
        &self,
        reservation_id: ReservationId,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(reservation_id, |r| r.request_payment_retry(now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn check_in(&self, cmd: CheckIn) -> Result<CommandResult<Reservation>, DomainError> {
        self.handler
            .execute_existing(cmd.reservation_id, |r| r.check_in(cmd.at))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn check_out(
        &self,
        cmd: CheckOut,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        self.handler
            .execute_existing(cmd.reservation_id, |r| r.check_out(cmd.at))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        cmd: CancelReservation,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(cmd.reservation_id, |r| r.cancel(&cmd.reason, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_escrow_released(
        &self,
        reservation_id: ReservationId,
        tx_hash: Option<TxHash>,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(reservation_id, |r| {
                r.mark_escrow_released(tx_hash.clone(), now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_release_failure(
        &self,
        reservation_id: ReservationId,
        reason: &str,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(reservation_id, |r| r.record_release_failure(reason, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_refunded(
        &self,
        reservation_id: ReservationId,
        tx_hash: Option<TxHash>,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(reservation_id, |r| r.mark_refunded(tx_hash.clone(), now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_refund_failure(
        &self,
        reservation_id: ReservationId,
        reason: &str,
    ) -> Result<CommandResult<Reservation>, DomainError> {
        let now = Utc::now();
        self.handler
            .execute_existing(reservation_id, |r| r.record_refund_failure(reason, now))
            .await
    }

    /// Loads a reservation by ID.
    ///
    /// Returns None if the reservation doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, DomainError> {
        self.handler.load_existing(reservation_id).await
    }

    /// Loads a reservation, failing with NotFound if it doesn't exist.
    pub async fn require(&self, reservation_id: ReservationId) -> Result<Reservation, DomainError> {
        self.get(reservation_id)
            .await?
            .ok_or(DomainError::NotFound(reservation_id))
    }

    /// Transition history, oldest first.
    pub async fn history(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        Ok(self.handler.store().history_for(reservation_id).await?)
    }

    /// Lists reservations, optionally filtered by status.
    #[tracing::instrument(skip(self))]
    pub async fn list(
        &self,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, DomainError> {
        let records = self
            .handler
            .store()
            .list_states(status.map(|s| s.as_str()))
            .await?;

        records
            .into_iter()
            .map(|record| {
                let mut reservation: Reservation = record.decode()?;
                crate::aggregate::Aggregate::set_version(&mut reservation, record.version);
                Ok(reservation)
            })
            .collect()
    }
}

//! Payment orchestrator: turns saga commands into ledger submissions.

use std::sync::Arc;
use std::time::Instant;

use common::{Purpose, ReservationId, TxHash};
use domain::{Reservation, ReservationService};
use ledger_gateway::{ContractCall, GatewayError, LedgerGateway, SubmitRequest};
use ledger_store::{ClaimOutcome, LedgerTransaction, NewClaim, SagaStore, TransactionStatus};

use crate::bus::EventPublisher;
use crate::command::{CommandOutcome, SagaCommand};
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::state::CommandStage;

/// A validated submission waiting for its claim.
#[derive(Debug, Clone)]
struct Plan {
    claim: NewClaim,
    call: ContractCall,
}

impl Plan {
    fn request(&self) -> SubmitRequest {
        SubmitRequest::settlement(
            self.claim.purpose,
            self.claim.payer.clone(),
            self.claim.payee.clone(),
            self.claim.amount,
            self.call.clone(),
        )
    }
}

/// Drives one command at a time through
/// `RECEIVED -> CLAIMED -> SUBMITTING -> {CONFIRMED | FAILED}`.
///
/// Handling is idempotent under redelivery: the atomic claim in the
/// transaction ledger decides which caller submits, and every other caller
/// reports the existing row instead of submitting again.
pub struct PaymentOrchestrator<S: SagaStore> {
    store: S,
    reservations: ReservationService<S>,
    gateway: Arc<dyn LedgerGateway>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: SagaStore + Clone> PaymentOrchestrator<S> {
    pub fn new(store: S, gateway: Arc<dyn LedgerGateway>, publisher: Arc<dyn EventPublisher>) -> Self {
        let reservations = ReservationService::with_fees(store.clone(), *gateway.fee_schedule());
        Self {
            store,
            reservations,
            gateway,
            publisher,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl<S: SagaStore> PaymentOrchestrator<S> {
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Handles a command and records how long it took.
    #[tracing::instrument(skip(self), fields(command = %command))]
    pub async fn handle(&self, command: SagaCommand) -> Result<CommandOutcome> {
        let started = Instant::now();
        let result = self.run(command).await;

        metrics::histogram!("saga_command_duration_seconds", "command" => command.topic())
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(outcome) => {
                metrics::counter!(
                    "saga_commands_total",
                    "command" => command.topic(),
                    "outcome" => outcome.label()
                )
                .increment(1);
                tracing::info!(
                    outcome = outcome.label(),
                    transaction_id = %outcome.transaction_id(),
                    "command handled"
                );
            }
            Err(e) if e.is_operational() => {
                tracing::error!(error = %e, "command blocked by operational failure");
            }
            Err(e) => tracing::warn!(error = %e, "command rejected"),
        }
        result
    }

    /// Ledger rows of a reservation, oldest first.
    pub async fn transactions(&self, reservation_id: ReservationId) -> Result<Vec<LedgerTransaction>> {
        Ok(self.store.history(reservation_id).await?)
    }

    pub async fn transaction_by_hash(&self, tx_hash: &TxHash) -> Result<LedgerTransaction> {
        self.store
            .find_by_hash(tx_hash)
            .await?
            .ok_or_else(|| SagaError::UnknownTransaction(tx_hash.clone()))
    }

    async fn run(&self, command: SagaCommand) -> Result<CommandOutcome> {
        let reservation_id = command.reservation_id();
        let purpose = command.purpose();
        let mut stage = CommandStage::Received;

        // Redelivered commands resolve against the existing row before any
        // precondition, so a replay after success is not a rejection.
        if let Some(existing) = self.active_row(reservation_id, purpose).await? {
            return Ok(Self::existing_outcome(existing));
        }

        let reservation = self.reservations.require(reservation_id).await?;
        let plan = self.plan(command, &reservation).await?;

        let row = match self.store.try_claim(plan.claim.clone()).await? {
            ClaimOutcome::Claimed(row) => row,
            ClaimOutcome::AlreadyClaimed(existing) => {
                tracing::debug!(transaction_id = %existing.id, "claim held elsewhere");
                return Ok(Self::existing_outcome(existing));
            }
        };
        stage = Self::advance(stage, CommandStage::Claimed);
        tracing::debug!(transaction_id = %row.id, stage = %stage, "claimed");

        self.submit(command, &row, &plan, stage).await
    }

    async fn active_row(
        &self,
        reservation_id: ReservationId,
        purpose: Purpose,
    ) -> Result<Option<LedgerTransaction>> {
        Ok(self
            .store
            .find(reservation_id, purpose)
            .await?
            .filter(LedgerTransaction::is_active))
    }

    fn existing_outcome(row: LedgerTransaction) -> CommandOutcome {
        if row.status == TransactionStatus::Confirmed {
            CommandOutcome::AlreadyConfirmed {
                transaction_id: row.id,
                tx_hash: row.tx_hash,
            }
        } else {
            CommandOutcome::InProgress {
                transaction_id: row.id,
                tx_hash: row.tx_hash,
            }
        }
    }

    fn advance(from: CommandStage, to: CommandStage) -> CommandStage {
        debug_assert!(from.can_advance_to(to), "{from} cannot advance to {to}");
        to
    }

    /// Checks the command's preconditions and builds the submission.
    async fn plan(&self, command: SagaCommand, reservation: &Reservation) -> Result<Plan> {
        let reservation_id = command.reservation_id();
        let status = reservation.status();
        let tenant = reservation
            .tenant_wallet()
            .cloned()
            .ok_or(SagaError::ReservationNotFound(reservation_id))?;
        let escrow = self.gateway.escrow_address().clone();

        match command {
            SagaCommand::InitiatePayment { .. } => {
                if !status.can_confirm_payment() || reservation.payment_confirmed() {
                    return Err(SagaError::InvalidTransition {
                        current: status,
                        action: "initiate payment",
                    });
                }
                let (start, end) = reservation
                    .check_in_date()
                    .zip(reservation.check_out_date())
                    .ok_or(SagaError::ReservationNotFound(reservation_id))?;
                Ok(Plan {
                    claim: NewClaim::new(
                        reservation_id,
                        Purpose::Payment,
                        tenant,
                        escrow,
                        reservation.total_amount(),
                    ),
                    call: ContractCall::CreateBooking {
                        property_id: reservation.property_id().to_string(),
                        start,
                        end,
                        rental_amount: reservation.rental_amount(),
                    },
                })
            }

            SagaCommand::ReleaseEscrow { .. } => {
                if status != domain::ReservationStatus::Completed {
                    return Err(SagaError::InvalidTransition {
                        current: status,
                        action: "release escrow",
                    });
                }
                if reservation.refunded() || self.confirmed(reservation_id, Purpose::Refund).await? {
                    return Err(SagaError::SettlementConflict(reservation_id));
                }
                let host = reservation
                    .host_wallet()
                    .cloned()
                    .ok_or(SagaError::ReservationNotFound(reservation_id))?;
                let booking_id = self.booking_id(reservation_id).await?;
                Ok(Plan {
                    claim: NewClaim::new(
                        reservation_id,
                        Purpose::EscrowRelease,
                        escrow,
                        host.clone(),
                        reservation.rental_amount(),
                    ),
                    call: ContractCall::ReleaseFunds { booking_id, host },
                })
            }

            SagaCommand::Refund { .. } => {
                if !self.confirmed(reservation_id, Purpose::Payment).await? {
                    return Err(SagaError::PaymentNotConfirmed(reservation_id));
                }
                if !status.can_refund() {
                    return Err(SagaError::InvalidTransition {
                        current: status,
                        action: "refund",
                    });
                }
                if reservation.escrow_released()
                    || self.confirmed(reservation_id, Purpose::EscrowRelease).await?
                {
                    return Err(SagaError::SettlementConflict(reservation_id));
                }
                let booking_id = self.booking_id(reservation_id).await?;
                Ok(Plan {
                    claim: NewClaim::new(
                        reservation_id,
                        Purpose::Refund,
                        escrow,
                        tenant,
                        reservation.total_amount(),
                    ),
                    call: ContractCall::CancelBooking { booking_id },
                })
            }
        }
    }

    async fn confirmed(&self, reservation_id: ReservationId, purpose: Purpose) -> Result<bool> {
        Ok(self
            .store
            .find(reservation_id, purpose)
            .await?
            .is_some_and(|row| row.is_confirmed()))
    }

    async fn booking_id(&self, reservation_id: ReservationId) -> Result<common::BookingId> {
        self.store
            .booking_for_reservation(reservation_id)
            .await?
            .ok_or(SagaError::BookingNotLinked(reservation_id))
    }

    /// Calls the gateway, retrying transient failures with backoff.
    async fn submit(
        &self,
        command: SagaCommand,
        row: &LedgerTransaction,
        plan: &Plan,
        stage: CommandStage,
    ) -> Result<CommandOutcome> {
        let stage = Self::advance(stage, CommandStage::Submitting);
        let request = plan.request();
        let mut attempt = 1;

        loop {
            tracing::debug!(attempt, stage = %stage, "submitting to ledger");
            match self.gateway.submit(request.clone()).await {
                Ok(provisional) => {
                    self.store
                        .mark_submitted(row.id, provisional.tx_hash.clone())
                        .await?;
                    if let Some(booking_id) = provisional.booking_id {
                        self.store
                            .link_booking(booking_id, row.reservation_id)
                            .await?;
                    }
                    return Ok(CommandOutcome::Submitted {
                        transaction_id: row.id,
                        tx_hash: provisional.tx_hash,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && self.retry.allows_retry_after(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    self.store.record_attempt(row.id).await?;
                    metrics::counter!("ledger_submission_retries_total", "purpose" => row.purpose.as_str())
                        .increment(1);
                    tracing::warn!(attempt, ?delay, error = %e, "transient ledger failure, backing off");
                    self.sleeper.sleep(delay).await;
                    attempt += 1;

                    if self.superseded(command, row).await? {
                        tracing::info!(transaction_id = %row.id, "target reached elsewhere, abandoning");
                        self.store.mark_failed(row.id, "abandoned: settled elsewhere").await?;
                        return Ok(CommandOutcome::Abandoned {
                            transaction_id: row.id,
                        });
                    }
                }
                Err(e) => return self.fail(row, e, attempt).await,
            }
        }
    }

    /// True when another path already reached the command's target, or the
    /// row was finalised by someone else while backing off.
    async fn superseded(&self, command: SagaCommand, row: &LedgerTransaction) -> Result<bool> {
        let current = self.store.get(row.id).await?;
        if current.status.is_final() {
            return Ok(true);
        }
        let Some(reservation) = self.reservations.get(row.reservation_id).await? else {
            return Ok(false);
        };
        Ok(match command {
            SagaCommand::InitiatePayment { .. } => reservation.payment_confirmed(),
            SagaCommand::ReleaseEscrow { .. } => reservation.escrow_released(),
            SagaCommand::Refund { .. } => reservation.refunded(),
        })
    }

    async fn fail(
        &self,
        row: &LedgerTransaction,
        error: GatewayError,
        attempts: u32,
    ) -> Result<CommandOutcome> {
        let reason = error.to_string();
        let marked = self.store.mark_failed(row.id, &reason).await?;
        tracing::warn!(
            transaction_id = %row.id,
            category = error.category().as_str(),
            attempts,
            %reason,
            "ledger submission failed"
        );
        if marked.applied {
            self.publisher
                .publish(SagaEvent::failed(row.reservation_id, row.purpose, None, &reason))
                .await?;
        }

        if let GatewayError::FeeWalletDepleted { .. } = error {
            return Err(SagaError::FeeWalletDepleted(reason));
        }
        Ok(CommandOutcome::Failed {
            transaction_id: row.id,
            reason,
            attempts,
        })
    }
}

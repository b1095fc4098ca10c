//! Reconciliation sweep for work the relay and the bus may have missed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{Purpose, ReservationId};
use domain::{Aggregate, ReservationService, ReservationStatus};
use ledger_store::{LedgerTransaction, SagaStore, TransactionQuery, TransactionStatus};
use tokio::sync::watch;

use crate::bus::{CommandDispatcher, EventPublisher};
use crate::command::SagaCommand;
use crate::confirmation::{ConfirmationHandler, Settlement};
use crate::error::Result;
use crate::events::SagaEvent;

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Rows untouched for this long are reconciled.
    pub stale_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Submitted rows whose receipt moved them to a final status.
    pub receipts_settled: usize,
    /// Claims that were never submitted and were failed.
    pub claims_expired: usize,
    pub releases_reissued: usize,
    pub refunds_reissued: usize,
    /// Confirmed ledger rows whose outcome never reached the reservation.
    pub outcomes_republished: usize,
}

/// Periodically reconciles:
/// - stale submitted rows, by polling their receipt
/// - stale unsubmitted claims, by failing them so the key can be claimed again
/// - COMPLETED reservations whose escrow was never released
/// - CANCELLED reservations holding a confirmed payment and no refund
/// - reservations behind a CONFIRMED ledger row, by republishing its outcome
pub struct ReconciliationSweeper<S: SagaStore> {
    store: S,
    reservations: ReservationService<S>,
    confirmations: Arc<ConfirmationHandler<S>>,
    publisher: Arc<dyn EventPublisher>,
    dispatcher: Arc<dyn CommandDispatcher>,
    config: SweeperConfig,
}

impl<S: SagaStore + Clone> ReconciliationSweeper<S> {
    pub fn new(
        store: S,
        confirmations: Arc<ConfirmationHandler<S>>,
        publisher: Arc<dyn EventPublisher>,
        dispatcher: Arc<dyn CommandDispatcher>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            reservations: ReservationService::new(store.clone()),
            store,
            confirmations,
            publisher,
            dispatcher,
            config,
        }
    }
}

impl<S: SagaStore> ReconciliationSweeper<S> {
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let cutoff = self.cutoff();
        self.reconcile_rows(cutoff, &mut report).await?;
        self.republish_payments(cutoff, &mut report).await?;
        self.reissue_settlements(cutoff, &mut report).await?;

        if report != SweepReport::default() {
            tracing::info!(
                receipts_settled = report.receipts_settled,
                claims_expired = report.claims_expired,
                releases_reissued = report.releases_reissued,
                refunds_reissued = report.refunds_reissued,
                outcomes_republished = report.outcomes_republished,
                "reconciliation sweep complete"
            );
        }
        Ok(report)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!(error = %e, "reconciliation sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!("reconciliation sweeper stopped");
    }

    fn cutoff(&self) -> DateTime<Utc> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() - stale_after
    }

    async fn reconcile_rows(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let rows = self
            .store
            .query(TransactionQuery::processing().updated_before(cutoff))
            .await?;

        for row in rows {
            match &row.tx_hash {
                Some(tx_hash) => match self.confirmations.settle_hash(tx_hash).await {
                    Ok(Settlement::Confirmed | Settlement::Failed) => {
                        Self::count("receipt_settled");
                        report.receipts_settled += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(transaction_id = %row.id, error = %e, "receipt poll failed");
                    }
                },
                None => {
                    let reason = "claim expired before submission";
                    let marked = self.store.mark_failed(row.id, reason).await?;
                    if marked.applied {
                        tracing::warn!(
                            transaction_id = %row.id,
                            reservation_id = %row.reservation_id,
                            purpose = %row.purpose,
                            "expired unsubmitted claim"
                        );
                        self.publisher
                            .publish(SagaEvent::failed(row.reservation_id, row.purpose, None, reason))
                            .await?;
                        Self::count("claim_expired");
                        report.claims_expired += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// PENDING or CANCELLED reservations that never saw their confirmed payment.
    async fn republish_payments(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        for status in [ReservationStatus::Pending, ReservationStatus::Cancelled] {
            for reservation in self.reservations.list(Some(status)).await? {
                let Some(reservation_id) = reservation.id().filter(|_| !reservation.payment_confirmed())
                else {
                    continue;
                };
                if let Some(row) = self.confirmed_row(reservation_id, Purpose::Payment).await? {
                    self.republish(&row, cutoff, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn reissue_settlements(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        for reservation in self.reservations.list(Some(ReservationStatus::Completed)).await? {
            if let Some(reservation_id) = reservation.id().filter(|_| reservation.awaits_release()) {
                if let Some(row) = self.confirmed_row(reservation_id, Purpose::EscrowRelease).await? {
                    self.republish(&row, cutoff, report).await?;
                    continue;
                }
                self.dispatcher
                    .dispatch(SagaCommand::ReleaseEscrow { reservation_id })
                    .await?;
                Self::count("release_reissued");
                report.releases_reissued += 1;
            }
        }

        for reservation in self.reservations.list(Some(ReservationStatus::Cancelled)).await? {
            if let Some(reservation_id) = reservation.id().filter(|_| reservation.awaits_refund()) {
                if let Some(row) = self.confirmed_row(reservation_id, Purpose::Refund).await? {
                    self.republish(&row, cutoff, report).await?;
                    continue;
                }
                self.dispatcher
                    .dispatch(SagaCommand::Refund { reservation_id })
                    .await?;
                Self::count("refund_reissued");
                report.refunds_reissued += 1;
            }
        }
        Ok(())
    }

    async fn confirmed_row(
        &self,
        reservation_id: ReservationId,
        purpose: Purpose,
    ) -> Result<Option<LedgerTransaction>> {
        Ok(self
            .store
            .find(reservation_id, purpose)
            .await?
            .filter(|row| row.status == TransactionStatus::Confirmed))
    }

    /// Publishes the outcome of a confirmed row again. Rows touched after
    /// `cutoff` are skipped; their own outcome may still be on the bus.
    async fn republish(
        &self,
        row: &LedgerTransaction,
        cutoff: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        if row.updated_at > cutoff {
            return Ok(());
        }
        tracing::warn!(
            transaction_id = %row.id,
            reservation_id = %row.reservation_id,
            purpose = %row.purpose,
            "republishing lost ledger outcome"
        );
        self.publisher
            .publish(SagaEvent::confirmed(
                row.reservation_id,
                row.purpose,
                row.tx_hash.clone(),
                row.block_number.unwrap_or_default(),
            ))
            .await?;
        Self::count("outcome_republished");
        report.outcomes_republished += 1;
        Ok(())
    }

    fn count(action: &'static str) {
        metrics::counter!("sweeper_actions_total", "action" => action).increment(1);
    }
}

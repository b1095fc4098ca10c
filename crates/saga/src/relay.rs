//! Event relay: turns contract logs into ledger settlements and outcome events.

use std::sync::Arc;
use std::time::Duration;

use common::ReservationId;
use ledger_gateway::{ContractEvent, LedgerGateway, RawContractEvent};
use ledger_store::{ProcessedKey, RelayCursor, SagaStore};
use tokio::sync::watch;

use crate::bus::EventPublisher;
use crate::confirmation::{ConfirmationHandler, Settlement};
use crate::error::{Result, SagaError};
use crate::events::{OutcomeKind, OutcomePayload, SagaEvent};

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Cursor name in the relay store.
    pub name: String,
    /// Blocks a log must sit behind the head before it is processed.
    pub confirmation_depth: u64,
    pub poll_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "escrow".to_string(),
            confirmation_depth: 0,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Counts from one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub processed: usize,
    pub duplicates: usize,
    pub orphaned: usize,
}

/// Reads contract logs from the cursor onwards and applies each one exactly
/// once.
///
/// The cursor only ever moves forward. A restart re-reads from the block of
/// the cursor, and logs already applied are recognised by their processed
/// key `(event name, tx hash, log index)`.
pub struct EventRelay<S: SagaStore> {
    store: S,
    gateway: Arc<dyn LedgerGateway>,
    confirmations: Arc<ConfirmationHandler<S>>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl<S: SagaStore> EventRelay<S> {
    pub fn new(
        store: S,
        gateway: Arc<dyn LedgerGateway>,
        confirmations: Arc<ConfirmationHandler<S>>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            confirmations,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Processes every log between the cursor and the safe head.
    ///
    /// Stops at the first log that cannot be applied yet, leaving it and
    /// everything after it for the next pass.
    #[tracing::instrument(skip(self), fields(relay = %self.config.name))]
    pub async fn poll_once(&self) -> Result<RelayReport> {
        let cursor = self.store.load_cursor(&self.config.name).await?;
        let head = self.gateway.head_block().await?;
        let safe_head = head.saturating_sub(self.config.confirmation_depth);
        let from = cursor.map(|c| c.block_number).unwrap_or(0);

        let mut report = RelayReport::default();
        if from > safe_head {
            return Ok(report);
        }

        let mut logs: Vec<RawContractEvent> = self
            .gateway
            .events(from)
            .await?
            .into_iter()
            .filter(|log| log.block_number <= safe_head)
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        for log in logs {
            let key = ProcessedKey::new(log.name(), log.tx_hash.clone(), log.log_index);
            if self.store.is_processed(&key).await? {
                metrics::counter!("relay_events_duplicate_total").increment(1);
                tracing::debug!(event = log.name(), tx_hash = %log.tx_hash, "duplicate log skipped");
                report.duplicates += 1;
                continue;
            }

            if !self.apply(&log).await? {
                report.orphaned += 1;
            }

            let position = RelayCursor::new(log.block_number, log.log_index);
            if self
                .store
                .record_processed(&self.config.name, key, position)
                .await?
            {
                metrics::counter!("relay_events_processed_total", "event" => log.name())
                    .increment(1);
                report.processed += 1;
            } else {
                report.duplicates += 1;
            }
        }

        if report != RelayReport::default() {
            tracing::info!(
                processed = report.processed,
                duplicates = report.duplicates,
                orphaned = report.orphaned,
                safe_head,
                "relay pass complete"
            );
        }
        Ok(report)
    }

    /// Polls until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "relay pass failed, retrying next tick");
                    }
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!(relay = %self.config.name, "event relay stopped");
    }

    /// Applies one log. Returns false when it could not be tied to a
    /// reservation and was dropped.
    async fn apply(&self, log: &RawContractEvent) -> Result<bool> {
        let Some(reservation_id) = self.correlate(log).await? else {
            return Ok(self.orphan(log, "no reservation linked to booking"));
        };

        match &log.event {
            ContractEvent::BookingCreated { .. }
            | ContractEvent::BookingConfirmed { .. }
            | ContractEvent::BookingCancelled { .. }
            | ContractEvent::PaymentReleased { .. } => self.settle(log, reservation_id).await,
            ContractEvent::CheckInCompleted { .. } => {
                self.recorded(log, reservation_id, OutcomeKind::CheckInRecorded)
                    .await?;
                Ok(true)
            }
            ContractEvent::CheckOutCompleted { .. } => {
                self.recorded(log, reservation_id, OutcomeKind::CheckOutRecorded)
                    .await?;
                Ok(true)
            }
            ContractEvent::BookingCompleted { booking_id } => {
                tracing::debug!(%booking_id, %reservation_id, "booking completed on ledger");
                Ok(true)
            }
        }
    }

    /// Maps the contract's booking ID to a reservation.
    ///
    /// A creation log can arrive before the submission result was linked;
    /// those fall back to the PAYMENT row carrying the same transaction hash.
    async fn correlate(&self, log: &RawContractEvent) -> Result<Option<ReservationId>> {
        let booking_id = log.event.booking_id();
        if let Some(id) = self.store.reservation_for_booking(booking_id).await? {
            return Ok(Some(id));
        }

        if !matches!(
            log.event,
            ContractEvent::BookingCreated { .. } | ContractEvent::BookingConfirmed { .. }
        ) {
            return Ok(None);
        }
        let Some(row) = self
            .store
            .find_by_hash(&log.tx_hash)
            .await?
            .filter(|row| row.purpose == common::Purpose::Payment)
        else {
            return Ok(None);
        };
        self.store.link_booking(booking_id, row.reservation_id).await?;
        tracing::info!(%booking_id, reservation_id = %row.reservation_id, "booking linked from payment hash");
        Ok(Some(row.reservation_id))
    }

    async fn settle(&self, log: &RawContractEvent, reservation_id: ReservationId) -> Result<bool> {
        match self.store.find_by_hash(&log.tx_hash).await? {
            Some(row) if row.reservation_id == reservation_id => {}
            Some(_) => return Ok(self.orphan(log, "transaction belongs to another reservation")),
            None => return Ok(self.orphan(log, "no ledger transaction for hash")),
        }

        match self.confirmations.settle_hash(&log.tx_hash).await {
            Ok(Settlement::Pending) => {
                // Logs only exist for mined transactions, so the node is lagging.
                Err(SagaError::Gateway(ledger_gateway::GatewayError::NetworkUnavailable(
                    format!("receipt for {} not available yet", log.tx_hash),
                )))
            }
            Ok(settlement) => {
                tracing::debug!(event = log.name(), ?settlement, "log settled");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn recorded(
        &self,
        log: &RawContractEvent,
        reservation_id: ReservationId,
        kind: OutcomeKind,
    ) -> Result<()> {
        let payload = OutcomePayload {
            tx_hash: Some(log.tx_hash.clone()),
            block_number: Some(log.block_number),
            reason: None,
        };
        self.publisher
            .publish(SagaEvent::new(reservation_id, kind, payload))
            .await?;
        Ok(())
    }

    fn orphan(&self, log: &RawContractEvent, reason: &'static str) -> bool {
        metrics::counter!("relay_events_orphaned_total", "event" => log.name()).increment(1);
        tracing::error!(
            event = log.name(),
            booking_id = %log.event.booking_id(),
            tx_hash = %log.tx_hash,
            block_number = log.block_number,
            reason,
            "dropping contract log with no local claim"
        );
        false
    }
}

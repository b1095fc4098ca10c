//! Settles ledger rows from on-chain receipts.

use std::sync::Arc;

use common::TxHash;
use ledger_gateway::{LedgerGateway, Receipt};
use ledger_store::{LedgerStore, LedgerTransaction, TransactionStatus};

use crate::bus::EventPublisher;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;

/// What settling a row did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Receipt still pending; nothing changed.
    Pending,
    /// The row moved to CONFIRMED and an outcome was published.
    Confirmed,
    /// The row moved to FAILED and an outcome was published.
    Failed,
    /// The row was already final; nothing was published.
    AlreadySettled,
}

/// Moves PROCESSING rows to their final status and publishes the outcome.
///
/// Only the caller whose status update was applied publishes, so the relay,
/// the webhook and the sweeper can all race on the same transaction.
pub struct ConfirmationHandler<S> {
    store: S,
    gateway: Arc<dyn LedgerGateway>,
    publisher: Arc<dyn EventPublisher>,
}

impl<S: LedgerStore> ConfirmationHandler<S> {
    pub fn new(store: S, gateway: Arc<dyn LedgerGateway>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            gateway,
            publisher,
        }
    }

    /// Looks up the receipt of `tx_hash` and settles its row.
    #[tracing::instrument(skip(self))]
    pub async fn settle_hash(&self, tx_hash: &TxHash) -> Result<Settlement> {
        let row = self
            .store
            .find_by_hash(tx_hash)
            .await?
            .ok_or_else(|| SagaError::UnknownTransaction(tx_hash.clone()))?;
        if row.status.is_final() {
            return Ok(Settlement::AlreadySettled);
        }
        let receipt = self.gateway.receipt_of(tx_hash).await?;
        self.settle(&row, receipt).await
    }

    /// Applies a receipt to a row.
    pub async fn settle(&self, row: &LedgerTransaction, receipt: Receipt) -> Result<Settlement> {
        match receipt {
            Receipt::Pending => Ok(Settlement::Pending),
            Receipt::Confirmed {
                block_number,
                gas_fee,
            } => {
                let marked = self.store.mark_confirmed(row.id, block_number, gas_fee).await?;
                if !marked.applied {
                    return Ok(Settlement::AlreadySettled);
                }
                tracing::info!(
                    transaction_id = %row.id,
                    reservation_id = %row.reservation_id,
                    purpose = %row.purpose,
                    block_number,
                    "ledger transaction confirmed"
                );
                metrics::counter!("ledger_confirmations_total", "purpose" => row.purpose.as_str())
                    .increment(1);
                self.publisher
                    .publish(SagaEvent::confirmed(
                        row.reservation_id,
                        row.purpose,
                        row.tx_hash.clone(),
                        block_number,
                    ))
                    .await?;
                Ok(Settlement::Confirmed)
            }
            Receipt::Reverted { reason, .. } => {
                if row.status == TransactionStatus::Failed {
                    return Ok(Settlement::AlreadySettled);
                }
                let marked = self.store.mark_failed(row.id, &reason).await?;
                if !marked.applied {
                    return Ok(Settlement::AlreadySettled);
                }
                tracing::warn!(
                    transaction_id = %row.id,
                    reservation_id = %row.reservation_id,
                    purpose = %row.purpose,
                    %reason,
                    "ledger transaction reverted"
                );
                self.publisher
                    .publish(SagaEvent::failed(
                        row.reservation_id,
                        row.purpose,
                        row.tx_hash.clone(),
                        reason,
                    ))
                    .await?;
                Ok(Settlement::Failed)
            }
        }
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{BookingId, Purpose, ReservationId, TransactionId, TxHash, Wei};
use tokio::sync::RwLock;

use crate::{
    ClaimOutcome, EventEnvelope, LedgerTransaction, Marked, NewClaim, ProcessedKey, RelayCursor,
    Result, StateRecord, StoreError, TransactionQuery, TransactionStatus, Version,
    store::{LedgerStore, RelayStore, ReservationStore, check_transition, record_claim_metric},
};

#[derive(Default)]
struct Inner {
    transactions: Vec<LedgerTransaction>,
    reservations: HashMap<ReservationId, StateRecord>,
    history: HashMap<ReservationId, Vec<EventEnvelope>>,
    links: Vec<(BookingId, ReservationId)>,
    cursors: HashMap<String, RelayCursor>,
    processed: HashSet<ProcessedKey>,
}

impl Inner {
    fn row_mut(&mut self, id: TransactionId) -> Result<&mut LedgerTransaction> {
        self.transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::NotFound(id))
    }
}

/// In-memory store for tests and single-process development.
///
/// One lock guards every table, which makes each trait method atomic in
/// the same way a database transaction would.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of ledger rows, including FAILED ones.
    pub async fn transaction_count(&self) -> usize {
        self.inner.read().await.transactions.len()
    }

    /// Number of processed relay keys.
    pub async fn processed_count(&self) -> usize {
        self.inner.read().await.processed.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn try_claim(&self, claim: NewClaim) -> Result<ClaimOutcome> {
        let mut inner = self.inner.write().await;

        let existing = inner
            .transactions
            .iter()
            .find(|t| {
                t.reservation_id == claim.reservation_id
                    && t.purpose == claim.purpose
                    && t.is_active()
            })
            .cloned();

        let outcome = match existing {
            Some(existing) => ClaimOutcome::AlreadyClaimed(existing),
            None => {
                let row = LedgerTransaction::from_claim(claim);
                inner.transactions.push(row.clone());
                ClaimOutcome::Claimed(row)
            }
        };
        record_claim_metric(&outcome);
        Ok(outcome)
    }

    async fn mark_submitted(&self, id: TransactionId, tx_hash: TxHash) -> Result<Marked> {
        let mut inner = self.inner.write().await;

        if inner
            .transactions
            .iter()
            .any(|t| t.id != id && t.tx_hash.as_ref() == Some(&tx_hash))
        {
            return Err(StoreError::DuplicateTransactionHash(tx_hash));
        }

        let row = inner.row_mut(id)?;
        match row.tx_hash.clone() {
            Some(current) if current == tx_hash => Ok(Marked {
                record: row.clone(),
                applied: false,
            }),
            Some(_) => Err(StoreError::InvalidStatusTransition {
                id,
                from: row.status,
                to: TransactionStatus::Processing,
            }),
            None if row.status != TransactionStatus::Processing => {
                Err(StoreError::InvalidStatusTransition {
                    id,
                    from: row.status,
                    to: TransactionStatus::Processing,
                })
            }
            None => {
                let now = Utc::now();
                row.tx_hash = Some(tx_hash);
                row.submitted_at = Some(now);
                row.updated_at = now;
                Ok(Marked {
                    record: row.clone(),
                    applied: true,
                })
            }
        }
    }

    async fn mark_confirmed(
        &self,
        id: TransactionId,
        block_number: u64,
        gas_fee: Wei,
    ) -> Result<Marked> {
        let mut inner = self.inner.write().await;
        let row = inner.row_mut(id)?;

        let applied = check_transition(row, TransactionStatus::Confirmed)?;
        if applied {
            let now = Utc::now();
            row.status = TransactionStatus::Confirmed;
            row.block_number = Some(block_number);
            row.gas_fee = Some(gas_fee);
            row.confirmed_at = Some(now);
            row.updated_at = now;
        }
        Ok(Marked {
            record: row.clone(),
            applied,
        })
    }

    async fn mark_failed(&self, id: TransactionId, reason: &str) -> Result<Marked> {
        let mut inner = self.inner.write().await;
        let row = inner.row_mut(id)?;

        let applied = check_transition(row, TransactionStatus::Failed)?;
        if applied {
            row.status = TransactionStatus::Failed;
            row.failure_reason = Some(reason.to_string());
            row.updated_at = Utc::now();
        }
        Ok(Marked {
            record: row.clone(),
            applied,
        })
    }

    async fn record_attempt(&self, id: TransactionId) -> Result<LedgerTransaction> {
        let mut inner = self.inner.write().await;
        let row = inner.row_mut(id)?;
        row.retry_count += 1;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn find(
        &self,
        reservation_id: ReservationId,
        purpose: Purpose,
    ) -> Result<Option<LedgerTransaction>> {
        let inner = self.inner.read().await;
        let rows = inner
            .transactions
            .iter()
            .filter(|t| t.reservation_id == reservation_id && t.purpose == purpose);

        let mut latest_failed = None;
        for row in rows {
            if row.is_active() {
                return Ok(Some(row.clone()));
            }
            latest_failed = Some(row);
        }
        Ok(latest_failed.cloned())
    }

    async fn find_by_hash(&self, tx_hash: &TxHash) -> Result<Option<LedgerTransaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .iter()
            .find(|t| t.tx_hash.as_ref() == Some(tx_hash))
            .cloned())
    }

    async fn get(&self, id: TransactionId) -> Result<LedgerTransaction> {
        let inner = self.inner.read().await;
        inner
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn history(&self, reservation_id: ReservationId) -> Result<Vec<LedgerTransaction>> {
        self.query(TransactionQuery::new().reservation(reservation_id))
            .await
    }

    async fn query(&self, query: TransactionQuery) -> Result<Vec<LedgerTransaction>> {
        let inner = self.inner.read().await;
        let rows = inner
            .transactions
            .iter()
            .filter(|t| query.matches(t))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(rows)
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn load_state(&self, reservation_id: ReservationId) -> Result<Option<StateRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .reservations
            .get(&reservation_id)
            .cloned())
    }

    async fn save_state(
        &self,
        record: StateRecord,
        expected: Version,
        history: Vec<EventEnvelope>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let reservation_id = record.reservation_id;

        let actual = inner
            .reservations
            .get(&reservation_id)
            .map(|r| r.version)
            .unwrap_or(Version::initial());
        if actual != expected {
            return Err(StoreError::ConcurrencyConflict {
                reservation_id,
                expected,
                actual,
            });
        }

        inner.reservations.insert(reservation_id, record);
        inner
            .history
            .entry(reservation_id)
            .or_default()
            .extend(history);
        Ok(())
    }

    async fn list_states(&self, status: Option<&str>) -> Result<Vec<StateRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .reservations
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn history_for(&self, reservation_id: ReservationId) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let mut entries = inner
            .history
            .get(&reservation_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }
}

#[async_trait]
impl RelayStore for InMemoryStore {
    async fn link_booking(
        &self,
        booking_id: BookingId,
        reservation_id: ReservationId,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.links.iter().find(|(b, _)| *b == booking_id) {
            Some((_, existing)) if *existing == reservation_id => Ok(()),
            Some((_, existing)) => Err(StoreError::LinkConflict {
                booking_id,
                existing: *existing,
            }),
            None => {
                inner.links.push((booking_id, reservation_id));
                Ok(())
            }
        }
    }

    async fn reservation_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<ReservationId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .links
            .iter()
            .find(|(b, _)| *b == booking_id)
            .map(|(_, r)| *r))
    }

    async fn booking_for_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<BookingId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .links
            .iter()
            .rev()
            .find(|(_, r)| *r == reservation_id)
            .map(|(b, _)| *b))
    }

    async fn load_cursor(&self, name: &str) -> Result<Option<RelayCursor>> {
        Ok(self.inner.read().await.cursors.get(name).copied())
    }

    async fn record_processed(
        &self,
        name: &str,
        key: ProcessedKey,
        position: RelayCursor,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let inserted = inner.processed.insert(key);

        let cursor = inner.cursors.entry(name.to_string()).or_default();
        if position > *cursor {
            *cursor = position;
        }
        Ok(inserted)
    }

    async fn is_processed(&self, key: &ProcessedKey) -> Result<bool> {
        Ok(self.inner.read().await.processed.contains(key))
    }
}

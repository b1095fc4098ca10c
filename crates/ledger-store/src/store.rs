use async_trait::async_trait;
use common::{BookingId, Purpose, ReservationId, TransactionId, TxHash, Wei};

use crate::{
    ClaimOutcome, EventEnvelope, LedgerTransaction, Marked, NewClaim, ProcessedKey, RelayCursor,
    Result, StateRecord, TransactionQuery, Version,
};

/// The transaction ledger: the idempotency anchor of the saga.
///
/// All implementations must be thread-safe (Send + Sync) and must make
/// [`try_claim`](LedgerStore::try_claim) atomic across processes, not just
/// across tasks.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically inserts a PROCESSING row unless a PROCESSING or CONFIRMED
    /// row already exists for `(reservation_id, purpose)`.
    ///
    /// FAILED rows never block a claim.
    async fn try_claim(&self, claim: NewClaim) -> Result<ClaimOutcome>;

    /// Records the hash returned by the network for a PROCESSING row.
    ///
    /// Re-recording the same hash is a no-op (`applied == false`).
    async fn mark_submitted(&self, id: TransactionId, tx_hash: TxHash) -> Result<Marked>;

    /// Moves a PROCESSING row to CONFIRMED.
    ///
    /// Confirming an already CONFIRMED row is a no-op; confirming a FAILED
    /// row is an error.
    async fn mark_confirmed(
        &self,
        id: TransactionId,
        block_number: u64,
        gas_fee: Wei,
    ) -> Result<Marked>;

    /// Moves a PROCESSING row to FAILED.
    ///
    /// Failing an already FAILED row is a no-op; failing a CONFIRMED row is
    /// an error.
    async fn mark_failed(&self, id: TransactionId, reason: &str) -> Result<Marked>;

    /// Increments the retry counter of a row.
    async fn record_attempt(&self, id: TransactionId) -> Result<LedgerTransaction>;

    /// Returns the active row for the key, or the most recent FAILED one.
    async fn find(
        &self,
        reservation_id: ReservationId,
        purpose: Purpose,
    ) -> Result<Option<LedgerTransaction>>;

    async fn find_by_hash(&self, tx_hash: &TxHash) -> Result<Option<LedgerTransaction>>;

    async fn get(&self, id: TransactionId) -> Result<LedgerTransaction>;

    /// All rows of a reservation, oldest first.
    async fn history(&self, reservation_id: ReservationId) -> Result<Vec<LedgerTransaction>>;

    /// Rows matching a query, oldest first.
    async fn query(&self, query: TransactionQuery) -> Result<Vec<LedgerTransaction>>;
}

/// Persistence for reservation state with compare-and-set writes.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn load_state(&self, reservation_id: ReservationId) -> Result<Option<StateRecord>>;

    /// Writes `record` if the stored version still equals `expected`, and
    /// appends `history` in the same atomic step.
    ///
    /// `Version::initial()` means the reservation must not exist yet.
    async fn save_state(
        &self,
        record: StateRecord,
        expected: Version,
        history: Vec<EventEnvelope>,
    ) -> Result<()>;

    /// Lists reservations, optionally filtered by status.
    async fn list_states(&self, status: Option<&str>) -> Result<Vec<StateRecord>>;

    /// Transition history of a reservation, in version order.
    async fn history_for(&self, reservation_id: ReservationId) -> Result<Vec<EventEnvelope>>;
}

/// Bookkeeping owned by the event relay.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Records which reservation a contract booking belongs to.
    ///
    /// Linking the same pair twice is a no-op.
    async fn link_booking(&self, booking_id: BookingId, reservation_id: ReservationId)
    -> Result<()>;

    async fn reservation_for_booking(&self, booking_id: BookingId)
    -> Result<Option<ReservationId>>;

    async fn booking_for_reservation(&self, reservation_id: ReservationId)
    -> Result<Option<BookingId>>;

    async fn load_cursor(&self, name: &str) -> Result<Option<RelayCursor>>;

    /// Marks a log as processed and advances the named cursor to at least
    /// `position`. Returns false if the key had already been recorded.
    async fn record_processed(
        &self,
        name: &str,
        key: ProcessedKey,
        position: RelayCursor,
    ) -> Result<bool>;

    async fn is_processed(&self, key: &ProcessedKey) -> Result<bool>;
}

/// Everything the saga needs from storage.
pub trait SagaStore: LedgerStore + ReservationStore + RelayStore {}

impl<T: LedgerStore + ReservationStore + RelayStore + ?Sized> SagaStore for T {}

/// Rejects status moves that would rewrite a final outcome.
pub(crate) fn check_transition(
    row: &LedgerTransaction,
    to: crate::TransactionStatus,
) -> Result<bool> {
    use crate::{StoreError, TransactionStatus};

    match (row.status, to) {
        (from, to) if from == to => Ok(false),
        (TransactionStatus::Processing, _) => Ok(true),
        (from, to) => Err(StoreError::InvalidStatusTransition {
            id: row.id,
            from,
            to,
        }),
    }
}

pub(crate) fn record_claim_metric(outcome: &ClaimOutcome) {
    metrics::counter!("ledger_claims_total").increment(1);
    if !outcome.is_claimed() {
        metrics::counter!("ledger_claims_conflicted_total").increment(1);
        tracing::debug!("ledger claim held by an existing row");
    }
}

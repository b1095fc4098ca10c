use chrono::{DateTime, Utc};
use common::{Purpose, ReservationId};

use crate::TransactionStatus;

/// Builder for filtering ledger transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub reservation_id: Option<ReservationId>,
    pub purpose: Option<Purpose>,
    pub status: Option<TransactionStatus>,

    /// Only rows whose hash is set (`Some(true)`) or unset (`Some(false)`).
    pub submitted: Option<bool>,

    /// Only rows not touched since this instant (exclusive).
    pub updated_before: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
}

impl TransactionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows still waiting on the network.
    pub fn processing() -> Self {
        Self {
            status: Some(TransactionStatus::Processing),
            ..Default::default()
        }
    }

    pub fn reservation(mut self, id: ReservationId) -> Self {
        self.reservation_id = Some(id);
        self
    }

    pub fn purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn submitted(mut self, submitted: bool) -> Self {
        self.submitted = Some(submitted);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates the filter against a row; used by the in-memory backend.
    pub fn matches(&self, row: &crate::LedgerTransaction) -> bool {
        if let Some(id) = self.reservation_id
            && row.reservation_id != id
        {
            return false;
        }
        if let Some(purpose) = self.purpose
            && row.purpose != purpose
        {
            return false;
        }
        if let Some(status) = self.status
            && row.status != status
        {
            return false;
        }
        if let Some(submitted) = self.submitted
            && row.is_submitted() != submitted
        {
            return false;
        }
        if let Some(before) = self.updated_before
            && row.updated_at >= before
        {
            return false;
        }
        true
    }
}

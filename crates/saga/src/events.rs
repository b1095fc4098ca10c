//! Outcome events published by the saga.

use chrono::{DateTime, Utc};
use common::{Purpose, ReservationId, TxHash};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of fact an outcome event reports, also its bus topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    PaymentConfirmed,
    PaymentFailed,
    EscrowReleased,
    EscrowReleaseFailed,
    RefundProcessed,
    RefundFailed,

    /// The contract recorded a check-in.
    CheckInRecorded,

    /// The contract recorded a check-out.
    CheckOutRecorded,
}

impl OutcomeKind {
    /// Success or failure outcome for a settled ledger purpose.
    pub fn for_settlement(purpose: Purpose, confirmed: bool) -> Self {
        match (purpose, confirmed) {
            (Purpose::Payment, true) => OutcomeKind::PaymentConfirmed,
            (Purpose::Payment, false) => OutcomeKind::PaymentFailed,
            (Purpose::EscrowRelease, true) => OutcomeKind::EscrowReleased,
            (Purpose::EscrowRelease, false) => OutcomeKind::EscrowReleaseFailed,
            (Purpose::Refund, true) => OutcomeKind::RefundProcessed,
            (Purpose::Refund, false) => OutcomeKind::RefundFailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::PaymentConfirmed => "PAYMENT_CONFIRMED",
            OutcomeKind::PaymentFailed => "PAYMENT_FAILED",
            OutcomeKind::EscrowReleased => "ESCROW_RELEASED",
            OutcomeKind::EscrowReleaseFailed => "ESCROW_RELEASE_FAILED",
            OutcomeKind::RefundProcessed => "REFUND_PROCESSED",
            OutcomeKind::RefundFailed => "REFUND_FAILED",
            OutcomeKind::CheckInRecorded => "CHECK_IN_RECORDED",
            OutcomeKind::CheckOutRecorded => "CHECK_OUT_RECORDED",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OutcomeKind::PaymentFailed | OutcomeKind::EscrowReleaseFailed | OutcomeKind::RefundFailed
        )
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// An immutable fact published after a state change.
///
/// Delivered at least once; consumers stay idempotent per
/// `(reservation_id, kind)` by checking current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaEvent {
    pub event_id: Uuid,
    pub reservation_id: ReservationId,
    pub kind: OutcomeKind,
    pub payload: OutcomePayload,
    pub occurred_at: DateTime<Utc>,
}

impl SagaEvent {
    pub fn new(reservation_id: ReservationId, kind: OutcomeKind, payload: OutcomePayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            reservation_id,
            kind,
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn confirmed(
        reservation_id: ReservationId,
        purpose: Purpose,
        tx_hash: Option<TxHash>,
        block_number: u64,
    ) -> Self {
        Self::new(
            reservation_id,
            OutcomeKind::for_settlement(purpose, true),
            OutcomePayload {
                tx_hash,
                block_number: Some(block_number),
                reason: None,
            },
        )
    }

    pub fn failed(
        reservation_id: ReservationId,
        purpose: Purpose,
        tx_hash: Option<TxHash>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            reservation_id,
            OutcomeKind::for_settlement(purpose, false),
            OutcomePayload {
                tx_hash,
                block_number: None,
                reason: Some(reason.into()),
            },
        )
    }

    pub fn tx_hash(&self) -> Option<&TxHash> {
        self.payload.tx_hash.as_ref()
    }

    pub fn reason(&self) -> &str {
        self.payload.reason.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_kinds_by_purpose() {
        assert_eq!(
            OutcomeKind::for_settlement(Purpose::Refund, true),
            OutcomeKind::RefundProcessed
        );
        assert!(OutcomeKind::for_settlement(Purpose::EscrowRelease, false).is_failure());
    }

    #[test]
    fn event_serializes_kind_as_topic() {
        let event = SagaEvent::failed(
            ReservationId::new(),
            Purpose::Payment,
            None,
            "insufficient_balance",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "PAYMENT_FAILED");
        assert_eq!(json["payload"]["reason"], "insufficient_balance");
        assert!(json["payload"].get("tx_hash").is_none());
    }
}

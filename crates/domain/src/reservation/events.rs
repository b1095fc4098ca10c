//! Reservation domain events.

use chrono::{DateTime, NaiveDate, Utc};
use common::{ReservationId, TxHash, WalletAddress, Wei};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on a reservation aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReservationEvent {
    ReservationCreated(ReservationCreatedData),

    /// Escrow funding observed on the ledger.
    PaymentConfirmed(SettlementData),

    /// The payment submission failed terminally; the guest may retry.
    PaymentFailed(FailureData),

    PaymentRetryRequested(TimestampData),

    CheckedIn(TimestampData),

    CheckedOut(TimestampData),

    EscrowReleased(SettlementData),

    /// Release failed; the reconciliation sweep will try again.
    EscrowReleaseFailed(FailureData),

    ReservationCancelled(CancelledData),

    RefundCompleted(SettlementData),

    RefundFailed(FailureData),
}

impl DomainEvent for ReservationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReservationEvent::ReservationCreated(_) => "ReservationCreated",
            ReservationEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            ReservationEvent::PaymentFailed(_) => "PaymentFailed",
            ReservationEvent::PaymentRetryRequested(_) => "PaymentRetryRequested",
            ReservationEvent::CheckedIn(_) => "CheckedIn",
            ReservationEvent::CheckedOut(_) => "CheckedOut",
            ReservationEvent::EscrowReleased(_) => "EscrowReleased",
            ReservationEvent::EscrowReleaseFailed(_) => "EscrowReleaseFailed",
            ReservationEvent::ReservationCancelled(_) => "ReservationCancelled",
            ReservationEvent::RefundCompleted(_) => "RefundCompleted",
            ReservationEvent::RefundFailed(_) => "RefundFailed",
        }
    }
}

/// Data for ReservationCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationCreatedData {
    pub reservation_id: ReservationId,
    pub property_id: String,
    pub tenant_wallet: WalletAddress,
    pub host_wallet: WalletAddress,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub rental_amount: Wei,
    pub platform_fee: Wei,
    pub total_amount: Wei,
    pub created_at: DateTime<Utc>,
}

/// A ledger transaction that settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementData {
    pub tx_hash: Option<TxHash>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureData {
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampData {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledData {
    pub reason: String,

    /// Whether escrow was funded at the time of cancellation.
    pub payment_confirmed: bool,

    pub at: DateTime<Utc>,
}

impl ReservationEvent {
    pub fn settled(kind: fn(SettlementData) -> Self, tx_hash: Option<TxHash>, at: DateTime<Utc>) -> Self {
        kind(SettlementData { tx_hash, at })
    }

    pub fn failed(kind: fn(FailureData) -> Self, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        kind(FailureData {
            reason: reason.into(),
            at,
        })
    }

    pub fn at(kind: fn(TimestampData) -> Self, at: DateTime<Utc>) -> Self {
        kind(TimestampData { at })
    }
}

//! Reservation aggregate implementation.

use chrono::{DateTime, NaiveDate, Utc};
use common::{FeeSchedule, ReservationId, TxHash, WalletAddress, Wei};
use ledger_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    CreateReservation, ReservationError, ReservationEvent, ReservationStatus,
    events::{CancelledData, ReservationCreatedData},
};

/// Reservation aggregate root.
///
/// Owns the booking lifecycle from request through check-out or
/// cancellation, plus the settlement flags the payment saga drives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    id: Option<ReservationId>,

    #[serde(default)]
    version: Version,

    property_id: String,
    tenant_wallet: Option<WalletAddress>,
    host_wallet: Option<WalletAddress>,
    check_in_date: Option<NaiveDate>,
    check_out_date: Option<NaiveDate>,

    rental_amount: Wei,
    platform_fee: Wei,
    total_amount: Wei,

    status: ReservationStatus,

    /// Escrow funding confirmed on the ledger.
    payment_confirmed: bool,

    /// Last payment attempt failed; the guest may retry.
    payment_failed: bool,

    escrow_released: bool,
    refunded: bool,

    last_failure: Option<String>,
    cancellation_reason: Option<String>,

    payment_tx: Option<TxHash>,
    release_tx: Option<TxHash>,
    refund_tx: Option<TxHash>,

    created_at: Option<DateTime<Utc>>,
    checked_in_at: Option<DateTime<Utc>>,
    checked_out_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Reservation {
    type Event = ReservationEvent;
    type Error = ReservationError;

    fn aggregate_type() -> &'static str {
        "Reservation"
    }

    fn id(&self) -> Option<ReservationId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn status_label(&self) -> &'static str {
        self.status.as_str()
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ReservationEvent::ReservationCreated(data) => self.apply_created(data),
            ReservationEvent::PaymentConfirmed(data) => {
                if self.status == ReservationStatus::Pending {
                    self.status = ReservationStatus::Confirmed;
                }
                self.payment_confirmed = true;
                self.payment_failed = false;
                self.last_failure = None;
                self.payment_tx = data.tx_hash;
                self.updated_at = Some(data.at);
            }
            ReservationEvent::PaymentFailed(data) => {
                self.payment_failed = true;
                self.last_failure = Some(data.reason);
                self.updated_at = Some(data.at);
            }
            ReservationEvent::PaymentRetryRequested(data) => {
                self.payment_failed = false;
                self.updated_at = Some(data.at);
            }
            ReservationEvent::CheckedIn(data) => {
                self.status = ReservationStatus::CheckedIn;
                self.checked_in_at = Some(data.at);
                self.updated_at = Some(data.at);
            }
            ReservationEvent::CheckedOut(data) => {
                self.status = ReservationStatus::Completed;
                self.checked_out_at = Some(data.at);
                self.updated_at = Some(data.at);
            }
            ReservationEvent::EscrowReleased(data) => {
                self.escrow_released = true;
                self.release_tx = data.tx_hash;
                self.last_failure = None;
                self.updated_at = Some(data.at);
            }
            ReservationEvent::EscrowReleaseFailed(data) | ReservationEvent::RefundFailed(data) => {
                self.last_failure = Some(data.reason);
                self.updated_at = Some(data.at);
            }
            ReservationEvent::ReservationCancelled(data) => self.apply_cancelled(data),
            ReservationEvent::RefundCompleted(data) => {
                if self.status.can_cancel() {
                    self.status = ReservationStatus::Cancelled;
                    self.cancellation_reason.get_or_insert_with(|| "refunded".to_string());
                }
                self.refunded = true;
                self.refund_tx = data.tx_hash;
                self.last_failure = None;
                self.updated_at = Some(data.at);
            }
        }
    }
}

// Query methods
impl Reservation {
    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn property_id(&self) -> &str {
        &self.property_id
    }

    pub fn tenant_wallet(&self) -> Option<&WalletAddress> {
        self.tenant_wallet.as_ref()
    }

    pub fn host_wallet(&self) -> Option<&WalletAddress> {
        self.host_wallet.as_ref()
    }

    pub fn check_in_date(&self) -> Option<NaiveDate> {
        self.check_in_date
    }

    pub fn check_out_date(&self) -> Option<NaiveDate> {
        self.check_out_date
    }

    pub fn rental_amount(&self) -> Wei {
        self.rental_amount
    }

    pub fn platform_fee(&self) -> Wei {
        self.platform_fee
    }

    /// Rental plus platform fee: the amount escrowed by the tenant.
    pub fn total_amount(&self) -> Wei {
        self.total_amount
    }

    pub fn payment_confirmed(&self) -> bool {
        self.payment_confirmed
    }

    pub fn payment_failed(&self) -> bool {
        self.payment_failed
    }

    pub fn escrow_released(&self) -> bool {
        self.escrow_released
    }

    pub fn refunded(&self) -> bool {
        self.refunded
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn payment_tx(&self) -> Option<&TxHash> {
        self.payment_tx.as_ref()
    }

    pub fn release_tx(&self) -> Option<&TxHash> {
        self.release_tx.as_ref()
    }

    pub fn refund_tx(&self) -> Option<&TxHash> {
        self.refund_tx.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True for a cancelled reservation whose escrow still holds the tenant's funds.
    pub fn awaits_refund(&self) -> bool {
        self.status == ReservationStatus::Cancelled && self.payment_confirmed && !self.refunded
    }

    /// True for a completed stay whose escrow has not reached the host yet.
    pub fn awaits_release(&self) -> bool {
        self.status == ReservationStatus::Completed && !self.escrow_released
    }

    fn invalid(&self, action: &'static str) -> ReservationError {
        ReservationError::InvalidTransition {
            current: self.status,
            action,
        }
    }
}

// Command methods (return events)
impl Reservation {
    /// Creates a reservation, pricing it with the platform fee schedule.
    pub fn create(
        &self,
        cmd: &CreateReservation,
        fees: &FeeSchedule,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.id.is_some() {
            return Err(ReservationError::AlreadyCreated);
        }
        if cmd.check_in_date < at.date_naive() {
            return Err(ReservationError::InvalidDates(
                "check-in date must not be in the past".to_string(),
            ));
        }
        if cmd.check_out_date <= cmd.check_in_date {
            return Err(ReservationError::InvalidDates(
                "check-out date must be after check-in date".to_string(),
            ));
        }
        if cmd.rental_amount.is_zero() {
            return Err(ReservationError::InvalidAmount(
                "rental amount must be greater than zero".to_string(),
            ));
        }
        let (platform_fee, total_amount) = fees
            .quote(cmd.rental_amount)
            .map_err(|e| ReservationError::InvalidAmount(e.to_string()))?;

        Ok(vec![ReservationEvent::ReservationCreated(
            ReservationCreatedData {
                reservation_id: cmd.reservation_id,
                property_id: cmd.property_id.clone(),
                tenant_wallet: cmd.tenant_wallet.clone(),
                host_wallet: cmd.host_wallet.clone(),
                check_in_date: cmd.check_in_date,
                check_out_date: cmd.check_out_date,
                rental_amount: cmd.rental_amount,
                platform_fee,
                total_amount,
                created_at: at,
            },
        )])
    }

    /// Records that escrow funding was confirmed.
    ///
    /// A confirmation arriving after cancellation is still recorded so that
    /// the funds can be refunded; the status stays CANCELLED.
    pub fn confirm_payment(
        &self,
        tx_hash: Option<TxHash>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.payment_confirmed {
            return Ok(vec![]);
        }
        match self.status {
            ReservationStatus::Pending | ReservationStatus::Cancelled => Ok(vec![
                ReservationEvent::settled(ReservationEvent::PaymentConfirmed, tx_hash, at),
            ]),
            _ => Err(self.invalid("confirm payment")),
        }
    }

    /// Flags a failed payment attempt; the reservation stays PENDING.
    pub fn record_payment_failure(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.payment_confirmed {
            // A late failure of an earlier attempt.
            return Ok(vec![]);
        }
        if self.status.is_terminal() {
            return Err(self.invalid("record payment failure"));
        }
        if self.payment_failed && self.last_failure.as_deref() == Some(reason) {
            return Ok(vec![]);
        }
        Ok(vec![ReservationEvent::failed(
            ReservationEvent::PaymentFailed,
            reason,
            at,
        )])
    }

    /// Clears the failure flag ahead of a new payment attempt.
    pub fn request_payment_retry(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if !self.status.can_confirm_payment() || !self.payment_failed {
            return Err(self.invalid("retry payment"));
        }
        Ok(vec![ReservationEvent::at(
            ReservationEvent::PaymentRetryRequested,
            at,
        )])
    }

    pub fn check_in(&self, at: DateTime<Utc>) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.status == ReservationStatus::CheckedIn {
            return Ok(vec![]);
        }
        if !self.status.can_check_in() {
            return Err(self.invalid("check in"));
        }
        if let Some(date) = self.check_in_date.filter(|d| at.date_naive() < *d) {
            return Err(ReservationError::CheckInTooEarly { date });
        }
        Ok(vec![ReservationEvent::at(ReservationEvent::CheckedIn, at)])
    }

    pub fn check_out(&self, at: DateTime<Utc>) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.status == ReservationStatus::Completed {
            return Ok(vec![]);
        }
        if !self.status.can_check_out() {
            return Err(self.invalid("check out"));
        }
        if let Some(date) = self.check_out_date.filter(|d| at.date_naive() < *d) {
            return Err(ReservationError::CheckOutTooEarly { date });
        }
        Ok(vec![ReservationEvent::at(ReservationEvent::CheckedOut, at)])
    }

    pub fn cancel(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.status == ReservationStatus::Cancelled {
            return Ok(vec![]);
        }
        if !self.status.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        Ok(vec![ReservationEvent::ReservationCancelled(CancelledData {
            reason: reason.to_string(),
            payment_confirmed: self.payment_confirmed,
            at,
        })])
    }

    /// Records the confirmed release of escrow to the host.
    pub fn mark_escrow_released(
        &self,
        tx_hash: Option<TxHash>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.escrow_released {
            return Ok(vec![]);
        }
        if self.status != ReservationStatus::Completed {
            return Err(self.invalid("release escrow"));
        }
        if self.refunded {
            return Err(ReservationError::SettlementConflict);
        }
        Ok(vec![ReservationEvent::settled(
            ReservationEvent::EscrowReleased,
            tx_hash,
            at,
        )])
    }

    pub fn record_release_failure(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.escrow_released {
            return Ok(vec![]);
        }
        if self.status != ReservationStatus::Completed {
            return Err(self.invalid("record release failure"));
        }
        if self.last_failure.as_deref() == Some(reason) {
            return Ok(vec![]);
        }
        Ok(vec![ReservationEvent::failed(
            ReservationEvent::EscrowReleaseFailed,
            reason,
            at,
        )])
    }

    /// Records the confirmed refund of escrow to the tenant.
    ///
    /// A refund on a reservation that was never cancelled cancels it.
    pub fn mark_refunded(
        &self,
        tx_hash: Option<TxHash>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.refunded {
            return Ok(vec![]);
        }
        if !self.status.can_refund() {
            return Err(self.invalid("refund"));
        }
        if self.escrow_released {
            return Err(ReservationError::SettlementConflict);
        }
        Ok(vec![ReservationEvent::settled(
            ReservationEvent::RefundCompleted,
            tx_hash,
            at,
        )])
    }

    pub fn record_refund_failure(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ReservationEvent>, ReservationError> {
        if self.refunded || self.last_failure.as_deref() == Some(reason) {
            return Ok(vec![]);
        }
        if !self.status.can_refund() {
            return Err(self.invalid("record refund failure"));
        }
        Ok(vec![ReservationEvent::failed(
            ReservationEvent::RefundFailed,
            reason,
            at,
        )])
    }
}

// Apply event helpers
impl Reservation {
    fn apply_created(&mut self, data: ReservationCreatedData) {
        self.id = Some(data.reservation_id);
        self.property_id = data.property_id;
        self.tenant_wallet = Some(data.tenant_wallet);
        self.host_wallet = Some(data.host_wallet);
        self.check_in_date = Some(data.check_in_date);
        self.check_out_date = Some(data.check_out_date);
        self.rental_amount = data.rental_amount;
        self.platform_fee = data.platform_fee;
        self.total_amount = data.total_amount;
        self.status = ReservationStatus::Pending;
        self.created_at = Some(data.created_at);
        self.updated_at = Some(data.created_at);
    }

    fn apply_cancelled(&mut self, data: CancelledData) {
        self.status = ReservationStatus::Cancelled;
        self.cancellation_reason = Some(data.reason);
        self.updated_at = Some(data.at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn create_reservation() -> Reservation {
        let mut reservation = Reservation::default();
        let today = now().date_naive();
        let cmd = CreateReservation {
            reservation_id: ReservationId::new(),
            property_id: "prop-42".to_string(),
            tenant_wallet: WalletAddress::new("0x1111111111111111111111111111111111111111"),
            host_wallet: WalletAddress::new("0x2222222222222222222222222222222222222222"),
            check_in_date: today,
            check_out_date: today + Duration::days(2),
            rental_amount: Wei::ether(1),
        };
        let events = reservation
            .create(&cmd, &FeeSchedule::default(), now())
            .unwrap();
        reservation.apply_events(events);
        reservation
    }

    fn confirmed() -> Reservation {
        let mut r = create_reservation();
        let events = r.confirm_payment(Some(TxHash::new("0xpay")), now()).unwrap();
        r.apply_events(events);
        r
    }

    fn apply(r: &mut Reservation, events: Vec<ReservationEvent>) {
        r.apply_events(events);
    }

    #[test]
    fn test_create_prices_with_fee() {
        let r = create_reservation();
        assert_eq!(r.status(), ReservationStatus::Pending);
        assert_eq!(r.platform_fee(), Wei::new(50_000_000_000_000_000));
        assert_eq!(r.total_amount(), Wei::new(1_050_000_000_000_000_000));
    }

    #[test]
    fn test_create_rejects_bad_dates() {
        let today = now().date_naive();
        let cmd = CreateReservation {
            reservation_id: ReservationId::new(),
            property_id: "p".to_string(),
            tenant_wallet: WalletAddress::new("0x1111111111111111111111111111111111111111"),
            host_wallet: WalletAddress::new("0x2222222222222222222222222222222222222222"),
            check_in_date: today + Duration::days(3),
            check_out_date: today + Duration::days(3),
            rental_amount: Wei::ether(1),
        };
        let result = Reservation::default().create(&cmd, &FeeSchedule::default(), now());
        assert!(matches!(result, Err(ReservationError::InvalidDates(_))));
    }

    #[test]
    fn test_create_twice_fails() {
        let r = create_reservation();
        let cmd = CreateReservation {
            reservation_id: r.id().unwrap(),
            property_id: "p".to_string(),
            tenant_wallet: WalletAddress::new("0x1111111111111111111111111111111111111111"),
            host_wallet: WalletAddress::new("0x2222222222222222222222222222222222222222"),
            check_in_date: now().date_naive(),
            check_out_date: now().date_naive() + Duration::days(1),
            rental_amount: Wei::ether(1),
        };
        assert!(matches!(
            r.create(&cmd, &FeeSchedule::default(), now()),
            Err(ReservationError::AlreadyCreated)
        ));
    }

    #[test]
    fn test_payment_confirmation_is_idempotent() {
        let r = confirmed();
        assert_eq!(r.status(), ReservationStatus::Confirmed);
        assert!(r.confirm_payment(None, now()).unwrap().is_empty());
    }

    #[test]
    fn test_payment_failure_keeps_pending_and_flags_retry() {
        let mut r = create_reservation();
        let events = r.record_payment_failure("insufficient balance", now()).unwrap();
        apply(&mut r, events);

        assert_eq!(r.status(), ReservationStatus::Pending);
        assert!(r.payment_failed());
        assert_eq!(r.last_failure(), Some("insufficient balance"));

        // Redelivery of the same failure changes nothing.
        assert!(
            r.record_payment_failure("insufficient balance", now())
                .unwrap()
                .is_empty()
        );

        let events = r.request_payment_retry(now()).unwrap();
        apply(&mut r, events);
        assert!(!r.payment_failed());
    }

    #[test]
    fn test_retry_without_failure_is_rejected() {
        let r = create_reservation();
        assert!(matches!(
            r.request_payment_retry(now()),
            Err(ReservationError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_late_failure_after_confirmation_is_ignored() {
        let r = confirmed();
        assert!(r.record_payment_failure("timeout", now()).unwrap().is_empty());
    }

    #[test]
    fn test_check_in_requires_confirmation() {
        let r = create_reservation();
        assert!(matches!(
            r.check_in(now()),
            Err(ReservationError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_check_out_before_date_is_rejected() {
        let mut r = confirmed();
        let events = r.check_in(now()).unwrap();
        apply(&mut r, events);

        assert!(matches!(
            r.check_out(now()),
            Err(ReservationError::CheckOutTooEarly { .. })
        ));

        let events = r.check_out(now() + Duration::days(2)).unwrap();
        apply(&mut r, events);
        assert_eq!(r.status(), ReservationStatus::Completed);
        assert!(r.awaits_release());
    }

    #[test]
    fn test_transitions_replayed_are_noops() {
        let mut r = confirmed();
        let events = r.check_in(now()).unwrap();
        apply(&mut r, events);
        assert!(r.check_in(now()).unwrap().is_empty());

        let events = r.check_out(now() + Duration::days(3)).unwrap();
        apply(&mut r, events);
        assert!(r.check_out(now() + Duration::days(3)).unwrap().is_empty());
    }

    #[test]
    fn test_terminal_states_reject_other_commands() {
        let mut r = confirmed();
        let events = r.cancel("guest request", now()).unwrap();
        apply(&mut r, events);

        assert!(r.cancel("again", now()).unwrap().is_empty());
        assert!(matches!(
            r.check_in(now()),
            Err(ReservationError::InvalidTransition { .. })
        ));
        assert!(matches!(
            r.mark_escrow_released(None, now()),
            Err(ReservationError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_after_payment_awaits_refund() {
        let mut r = confirmed();
        let events = r.cancel("guest request", now()).unwrap();
        assert!(matches!(
            &events[0],
            ReservationEvent::ReservationCancelled(data) if data.payment_confirmed
        ));
        apply(&mut r, events);
        assert!(r.awaits_refund());

        let events = r.mark_refunded(Some(TxHash::new("0xrefund")), now()).unwrap();
        apply(&mut r, events);
        assert!(r.refunded());
        assert!(!r.awaits_refund());
        assert!(r.mark_refunded(None, now()).unwrap().is_empty());
    }

    #[test]
    fn test_payment_confirmed_after_cancellation_is_recorded() {
        let mut r = create_reservation();
        let events = r.cancel("changed plans", now()).unwrap();
        apply(&mut r, events);

        let events = r.confirm_payment(Some(TxHash::new("0xlate")), now()).unwrap();
        apply(&mut r, events);

        assert_eq!(r.status(), ReservationStatus::Cancelled);
        assert!(r.awaits_refund());
    }

    #[test]
    fn test_refund_on_confirmed_reservation_cancels_it() {
        let mut r = confirmed();
        let events = r.mark_refunded(None, now()).unwrap();
        apply(&mut r, events);
        assert_eq!(r.status(), ReservationStatus::Cancelled);
        assert!(r.refunded());
    }

    #[test]
    fn test_escrow_release_only_once() {
        let mut r = confirmed();
        let events = r.check_in(now()).unwrap();
        apply(&mut r, events);
        let events = r.check_out(now() + Duration::days(2)).unwrap();
        apply(&mut r, events);

        let events = r.record_release_failure("network unavailable", now()).unwrap();
        apply(&mut r, events);
        assert!(!r.escrow_released());

        let events = r.mark_escrow_released(Some(TxHash::new("0xrel")), now()).unwrap();
        apply(&mut r, events);
        assert!(r.escrow_released());
        assert!(!r.awaits_release());
        assert!(r.mark_escrow_released(None, now()).unwrap().is_empty());
        assert!(matches!(
            r.mark_refunded(None, now()),
            Err(ReservationError::InvalidTransition { .. })
        ));
    }
}

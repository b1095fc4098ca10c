//! Reservation status machine.

use serde::{Deserialize, Serialize};

/// The status of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► CheckedIn ──► Completed
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Created, payment not yet confirmed on the ledger.
    #[default]
    Pending,

    /// Payment confirmed, funds held in escrow.
    Confirmed,

    CheckedIn,

    /// Guest checked out (terminal state). Escrow release may still be pending.
    Completed,

    /// Cancelled before check-in (terminal state).
    Cancelled,
}

impl ReservationStatus {
    pub fn can_confirm_payment(&self) -> bool {
        matches!(self, ReservationStatus::Pending)
    }

    pub fn can_check_in(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed)
    }

    pub fn can_check_out(&self) -> bool {
        matches!(self, ReservationStatus::CheckedIn)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    /// Statuses from which a refund may be attempted.
    pub fn can_refund(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::Confirmed | ReservationStatus::Cancelled
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::CheckedIn => "CHECKED_IN",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CHECKED_IN" => Ok(ReservationStatus::CheckedIn),
            "COMPLETED" => Ok(ReservationStatus::Completed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(ReservationStatus::default(), ReservationStatus::Pending);
    }

    #[test]
    fn test_only_pending_and_confirmed_can_cancel() {
        assert!(ReservationStatus::Pending.can_cancel());
        assert!(ReservationStatus::Confirmed.can_cancel());
        assert!(!ReservationStatus::CheckedIn.can_cancel());
        assert!(!ReservationStatus::Completed.can_cancel());
        assert!(!ReservationStatus::Cancelled.can_cancel());
    }

    #[test]
    fn test_refund_allowed_statuses() {
        assert!(ReservationStatus::Pending.can_refund());
        assert!(ReservationStatus::Confirmed.can_refund());
        assert!(ReservationStatus::Cancelled.can_refund());
        assert!(!ReservationStatus::CheckedIn.can_refund());
        assert!(!ReservationStatus::Completed.can_refund());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(!ReservationStatus::CheckedIn.is_terminal());
        assert!(ReservationStatus::Completed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReservationStatus::CheckedIn).unwrap(),
            "\"CHECKED_IN\""
        );
        assert_eq!(
            "COMPLETED".parse::<ReservationStatus>().unwrap(),
            ReservationStatus::Completed
        );
    }
}

use chrono::{DateTime, Utc};
use common::{Purpose, ReservationId, TransactionId, TxHash, WalletAddress, Wei};
use serde::{Deserialize, Serialize};

/// Lifecycle of a ledger transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Claimed; possibly submitted, not yet observed in a block.
    Processing,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TransactionStatus::Processing)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "CONFIRMED" => Ok(TransactionStatus::Confirmed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// A durable record of one attempted ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub reservation_id: ReservationId,
    pub purpose: Purpose,
    pub payer: WalletAddress,
    pub payee: WalletAddress,
    pub amount: Wei,
    pub gas_fee: Option<Wei>,
    pub tx_hash: Option<TxHash>,
    pub status: TransactionStatus,
    pub block_number: Option<u64>,
    /// Submission attempts beyond the first.
    pub retry_count: u32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Creates a fresh PROCESSING row for a claim.
    pub fn from_claim(claim: NewClaim) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            reservation_id: claim.reservation_id,
            purpose: claim.purpose,
            payer: claim.payer,
            payee: claim.payee,
            amount: claim.amount,
            gas_fee: None,
            tx_hash: None,
            status: TransactionStatus::Processing,
            block_number: None,
            retry_count: 0,
            failure_reason: None,
            created_at: now,
            submitted_at: None,
            confirmed_at: None,
            updated_at: now,
        }
    }

    /// True once the network accepted the transaction for broadcast.
    pub fn is_submitted(&self) -> bool {
        self.tx_hash.is_some()
    }

    /// PROCESSING or CONFIRMED rows hold the claim for their key.
    pub fn is_active(&self) -> bool {
        self.status != TransactionStatus::Failed
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }
}

/// Input to [`LedgerStore::try_claim`](crate::LedgerStore::try_claim).
#[derive(Debug, Clone, PartialEq)]
pub struct NewClaim {
    pub reservation_id: ReservationId,
    pub purpose: Purpose,
    pub payer: WalletAddress,
    pub payee: WalletAddress,
    pub amount: Wei,
}

impl NewClaim {
    pub fn new(
        reservation_id: ReservationId,
        purpose: Purpose,
        payer: WalletAddress,
        payee: WalletAddress,
        amount: Wei,
    ) -> Self {
        Self {
            reservation_id,
            purpose,
            payer,
            payee,
            amount,
        }
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// A new PROCESSING row was inserted; the caller owns the submission.
    Claimed(LedgerTransaction),
    /// Another PROCESSING or CONFIRMED row already holds the key.
    AlreadyClaimed(LedgerTransaction),
}

impl ClaimOutcome {
    pub fn record(&self) -> &LedgerTransaction {
        match self {
            ClaimOutcome::Claimed(record) | ClaimOutcome::AlreadyClaimed(record) => record,
        }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

/// Result of a status update.
///
/// `applied` is false when the row was already in the requested state, so
/// redelivered confirmations can be told apart from first deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct Marked {
    pub record: LedgerTransaction,
    pub applied: bool,
}

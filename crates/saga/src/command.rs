//! Saga commands and their outcomes.

use common::{Purpose, ReservationId, TransactionId, TxHash};
use serde::{Deserialize, Serialize};

use crate::state::CommandStage;

/// A command for the payment orchestrator, as carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaCommand {
    InitiatePayment { reservation_id: ReservationId },
    ReleaseEscrow { reservation_id: ReservationId },
    Refund { reservation_id: ReservationId },
}

impl SagaCommand {
    pub fn reservation_id(&self) -> ReservationId {
        match self {
            SagaCommand::InitiatePayment { reservation_id }
            | SagaCommand::ReleaseEscrow { reservation_id }
            | SagaCommand::Refund { reservation_id } => *reservation_id,
        }
    }

    /// Ledger purpose the command settles.
    pub fn purpose(&self) -> Purpose {
        match self {
            SagaCommand::InitiatePayment { .. } => Purpose::Payment,
            SagaCommand::ReleaseEscrow { .. } => Purpose::EscrowRelease,
            SagaCommand::Refund { .. } => Purpose::Refund,
        }
    }

    /// Bus topic name.
    pub fn topic(&self) -> &'static str {
        match self {
            SagaCommand::InitiatePayment { .. } => "INITIATE_PAYMENT",
            SagaCommand::ReleaseEscrow { .. } => "RELEASE_ESCROW",
            SagaCommand::Refund { .. } => "REFUND",
        }
    }
}

impl std::fmt::Display for SagaCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.topic(), self.reservation_id())
    }
}

/// What handling a command achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandOutcome {
    /// Broadcast; confirmation arrives asynchronously.
    Submitted {
        transaction_id: TransactionId,
        tx_hash: TxHash,
        attempts: u32,
    },

    /// A previous attempt already settled; nothing was submitted.
    AlreadyConfirmed {
        transaction_id: TransactionId,
        tx_hash: Option<TxHash>,
    },

    /// Another attempt holds the claim; nothing was submitted.
    InProgress {
        transaction_id: TransactionId,
        tx_hash: Option<TxHash>,
    },

    /// The target state was reached by another path while backing off.
    Abandoned { transaction_id: TransactionId },

    Failed {
        transaction_id: TransactionId,
        reason: String,
        attempts: u32,
    },
}

impl CommandOutcome {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            CommandOutcome::Submitted { transaction_id, .. }
            | CommandOutcome::AlreadyConfirmed { transaction_id, .. }
            | CommandOutcome::InProgress { transaction_id, .. }
            | CommandOutcome::Abandoned { transaction_id }
            | CommandOutcome::Failed { transaction_id, .. } => *transaction_id,
        }
    }

    pub fn stage(&self) -> CommandStage {
        match self {
            CommandOutcome::Submitted { .. } => CommandStage::Submitting,
            CommandOutcome::AlreadyConfirmed { .. } => CommandStage::Confirmed,
            CommandOutcome::InProgress { .. } => CommandStage::Claimed,
            CommandOutcome::Abandoned { .. } | CommandOutcome::Failed { .. } => {
                CommandStage::Failed
            }
        }
    }

    /// True when this call broadcast a transaction.
    pub fn submitted(&self) -> bool {
        matches!(self, CommandOutcome::Submitted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Submitted { .. } => "submitted",
            CommandOutcome::AlreadyConfirmed { .. } => "already_confirmed",
            CommandOutcome::InProgress { .. } => "in_progress",
            CommandOutcome::Abandoned { .. } => "abandoned",
            CommandOutcome::Failed { .. } => "failed",
        }
    }
}

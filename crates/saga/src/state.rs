//! Per-command progress of the payment orchestrator.

use serde::{Deserialize, Serialize};

/// The stage a saga command has reached.
///
/// State transitions:
/// ```text
/// Received ──► Claimed ──► Submitting ──┬──► Confirmed
///                                       └──► Failed
/// ```
/// A command whose claim is lost to another worker stops at `Claimed` (in
/// progress elsewhere) or jumps to `Confirmed` (already settled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStage {
    #[default]
    Received,

    /// The ledger claim for (reservation, purpose) is held.
    Claimed,

    /// Handed to the ledger; waiting for confirmation.
    Submitting,

    Confirmed,

    Failed,
}

impl CommandStage {
    pub fn can_advance_to(&self, next: CommandStage) -> bool {
        use CommandStage::*;
        matches!(
            (*self, next),
            (Received, Claimed)
                | (Received, Confirmed)
                | (Received, Failed)
                | (Claimed, Submitting)
                | (Claimed, Failed)
                | (Submitting, Confirmed)
                | (Submitting, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStage::Confirmed | CommandStage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStage::Received => "RECEIVED",
            CommandStage::Claimed => "CLAIMED",
            CommandStage::Submitting => "SUBMITTING",
            CommandStage::Confirmed => "CONFIRMED",
            CommandStage::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for CommandStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

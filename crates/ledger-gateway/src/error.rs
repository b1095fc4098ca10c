//! Gateway error types.

use common::Wei;
use thiserror::Error;

/// How the caller should treat a failed gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Worth retrying with backoff.
    Transient,

    /// This request can never succeed as submitted.
    TerminalRequest,

    /// Nothing can be submitted until an operator intervenes.
    TerminalOperational,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Transient => "transient",
            FailureCategory::TerminalRequest => "terminal_request",
            FailureCategory::TerminalOperational => "terminal_operational",
        }
    }
}

/// Errors returned by the ledger gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Insufficient balance: required {required} wei, available {available} wei")]
    InsufficientBalance { required: Wei, available: Wei },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The contract's own precondition failed.
    #[error("Contract rejected the call: {0}")]
    ContractRejected(String),

    /// The platform wallet paying transaction fees is below its floor.
    #[error("Fee wallet depleted: balance {balance} wei is below floor {floor} wei")]
    FeeWalletDepleted { balance: Wei, floor: Wei },

    #[error("Unknown ledger error: {0}")]
    Unknown(String),
}

impl GatewayError {
    /// Only network failures are retried by callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::NetworkUnavailable(_))
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            GatewayError::NetworkUnavailable(_) => FailureCategory::Transient,
            GatewayError::FeeWalletDepleted { .. } => FailureCategory::TerminalOperational,
            GatewayError::InsufficientBalance { .. }
            | GatewayError::InvalidAddress(_)
            | GatewayError::ContractRejected(_)
            | GatewayError::Unknown(_) => FailureCategory::TerminalRequest,
        }
    }

    /// Short label used in metrics and persisted failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InsufficientBalance { .. } => "insufficient_balance",
            GatewayError::InvalidAddress(_) => "invalid_address",
            GatewayError::NetworkUnavailable(_) => "network_unavailable",
            GatewayError::ContractRejected(_) => "contract_rejected",
            GatewayError::FeeWalletDepleted { .. } => "fee_wallet_depleted",
            GatewayError::Unknown(_) => "unknown",
        }
    }
}

impl From<common::InvalidAddress> for GatewayError {
    fn from(e: common::InvalidAddress) -> Self {
        GatewayError::InvalidAddress(e.0)
    }
}

/// Convenience type alias for gateway results.
pub type Result<T> = std::result::Result<T, GatewayError>;

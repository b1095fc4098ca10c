//! Ledger gateway for the escrow contract.
//!
//! This crate provides:
//! - `LedgerGateway`: submissions, balances, receipts and contract events
//! - `EscrowGateway`: preflight checks, the fee model and call timeouts on top
//!   of any `ChainBackend`
//! - `SimulatedChain`: an in-process chain running the escrow contract, with
//!   block production under the caller's control

pub mod backend;
pub mod error;
pub mod gateway;
pub mod simulated;
pub mod types;

pub use backend::ChainBackend;
pub use error::{FailureCategory, GatewayError, Result};
pub use gateway::{
    DEFAULT_FEE_WALLET_FLOOR, DEFAULT_MIN_FEE_BUFFER, EscrowGateway, GatewayConfig, LedgerGateway,
};
pub use simulated::{ChainConfig, DEFAULT_GAS_FEE, SimulatedChain};
pub use types::{
    ContractCall, ContractEvent, OnChainBooking, OnChainStatus, ProvisionalRef,
    RawContractEvent, Receipt, SubmitRequest,
};

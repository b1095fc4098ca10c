//! Raw access to the chain hosting the escrow contract.

use async_trait::async_trait;
use common::{BookingId, TxHash, WalletAddress, Wei};

use crate::error::Result;
use crate::types::{ContractCall, OnChainBooking, ProvisionalRef, RawContractEvent, Receipt};

/// Node-level operations the gateway builds on.
///
/// Implementations do no policy checks of their own beyond what the chain
/// itself enforces; the gateway validates requests before calling `send`.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Native balance of an account.
    async fn balance(&self, address: &WalletAddress) -> Result<Wei>;

    /// Signs and broadcasts a contract call. Returns once the transaction is
    /// accepted into the mempool.
    async fn send(
        &self,
        from: &WalletAddress,
        call: &ContractCall,
        value: Wei,
    ) -> Result<ProvisionalRef>;

    /// Receipt of a broadcast transaction; fails with `GatewayError::Unknown`
    /// if the node never saw it.
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Receipt>;

    /// Contract logs in blocks `from_block..=to_block`, in block and log order.
    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawContractEvent>>;

    /// Number of the latest mined block.
    async fn block_number(&self) -> Result<u64>;

    async fn booking(&self, booking_id: BookingId) -> Result<Option<OnChainBooking>>;

    /// Funds the contract owes an address under pull payments.
    async fn pending_withdrawal(&self, address: &WalletAddress) -> Result<Wei>;
}

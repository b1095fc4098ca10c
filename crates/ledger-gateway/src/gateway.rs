//! Ledger gateway: the only component that talks to the escrow contract.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use common::{BookingId, FeeSchedule, TxHash, WalletAddress, Wei};

use crate::backend::ChainBackend;
use crate::error::{GatewayError, Result};
use crate::types::{
    ContractCall, OnChainBooking, ProvisionalRef, RawContractEvent, Receipt, SubmitRequest,
};

/// Default payer headroom above the amount: 0.001 ether.
pub const DEFAULT_MIN_FEE_BUFFER: Wei = Wei::new(1_000_000_000_000_000);

/// Default operational floor of the platform wallet: 0.01 ether.
pub const DEFAULT_FEE_WALLET_FLOOR: Wei = Wei::new(10_000_000_000_000_000);

/// Operations the saga needs from the ledger.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Validates and broadcasts a transaction. Returns as soon as the network
    /// accepts it; inclusion is learned later from events or receipts.
    async fn submit(&self, request: SubmitRequest) -> Result<ProvisionalRef>;

    async fn balance_of(&self, address: &WalletAddress) -> Result<Wei>;

    async fn receipt_of(&self, tx_hash: &TxHash) -> Result<Receipt>;

    /// Contract events from `since_block` (inclusive) up to the chain head.
    async fn events(&self, since_block: u64) -> Result<Vec<RawContractEvent>>;

    async fn head_block(&self) -> Result<u64>;

    async fn booking(&self, booking_id: BookingId) -> Result<Option<OnChainBooking>>;

    async fn pending_withdrawal(&self, address: &WalletAddress) -> Result<Wei>;

    /// Escrow contract address, the payee of payments and payer of payouts.
    fn escrow_address(&self) -> &WalletAddress;

    /// Platform wallet that signs admin calls and pays their fees.
    fn platform_wallet(&self) -> &WalletAddress;

    fn fee_schedule(&self) -> &FeeSchedule;
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub escrow_contract: WalletAddress,
    pub platform_wallet: WalletAddress,

    /// Must match the contract's fee percentage.
    pub fee_schedule: FeeSchedule,

    /// Headroom a payer needs above the amount to cover transaction fees.
    pub min_fee_buffer: Wei,

    /// Below this balance the platform wallet is considered depleted.
    pub fee_wallet_floor: Wei,

    /// Upper bound on any single node call.
    pub call_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(escrow_contract: WalletAddress, platform_wallet: WalletAddress) -> Self {
        Self {
            escrow_contract,
            platform_wallet,
            fee_schedule: FeeSchedule::default(),
            min_fee_buffer: DEFAULT_MIN_FEE_BUFFER,
            fee_wallet_floor: DEFAULT_FEE_WALLET_FLOOR,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_fee_schedule(mut self, fee_schedule: FeeSchedule) -> Self {
        self.fee_schedule = fee_schedule;
        self
    }

    pub fn with_min_fee_buffer(mut self, buffer: Wei) -> Self {
        self.min_fee_buffer = buffer;
        self
    }

    pub fn with_fee_wallet_floor(mut self, floor: Wei) -> Self {
        self.fee_wallet_floor = floor;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Ledger gateway for the escrow contract.
///
/// Every submission passes the preflight checks below before anything is
/// broadcast:
/// 1. payer and payee addresses are well formed
/// 2. the platform wallet is above its operational floor
/// 3. a `createBooking` value equals rental plus fee exactly
/// 4. the payer can cover the amount (plus the fee buffer for payable calls)
pub struct EscrowGateway<B: ChainBackend> {
    backend: B,
    config: GatewayConfig,
}

impl<B: ChainBackend> EscrowGateway<B> {
    pub fn new(backend: B, config: GatewayConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Bounds a node call by the configured timeout.
    async fn timed<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout = ?self.config.call_timeout, "ledger call timed out");
                Err(GatewayError::NetworkUnavailable(format!(
                    "{op} timed out after {:?}",
                    self.config.call_timeout
                )))
            }
        }
    }

    async fn check_fee_wallet(&self) -> Result<()> {
        let balance = self
            .timed("balance", self.backend.balance(&self.config.platform_wallet))
            .await?;
        if balance < self.config.fee_wallet_floor {
            metrics::counter!("ledger_fee_wallet_depleted_total").increment(1);
            tracing::error!(
                wallet = %self.config.platform_wallet,
                %balance,
                floor = %self.config.fee_wallet_floor,
                "platform fee wallet below operational floor"
            );
            return Err(GatewayError::FeeWalletDepleted {
                balance,
                floor: self.config.fee_wallet_floor,
            });
        }
        Ok(())
    }

    fn check_amount(&self, request: &SubmitRequest) -> Result<()> {
        if let ContractCall::CreateBooking { rental_amount, .. } = &request.call {
            let expected = self
                .config
                .fee_schedule
                .total_for(*rental_amount)
                .map_err(|e| GatewayError::ContractRejected(e.to_string()))?;
            if expected != request.amount {
                return Err(GatewayError::ContractRejected(format!(
                    "payment of {} wei does not match rental plus fee of {} wei",
                    request.amount, expected
                )));
            }
        }
        Ok(())
    }

    async fn check_payer_balance(&self, request: &SubmitRequest) -> Result<()> {
        if request.amount.is_zero() {
            return Ok(());
        }
        let required = if request.call.is_payable() {
            request
                .amount
                .checked_add(self.config.min_fee_buffer)
                .map_err(|e| GatewayError::Unknown(e.to_string()))?
        } else {
            request.amount
        };
        let available = self
            .timed("balance", self.backend.balance(&request.payer))
            .await?;
        if available < required {
            return Err(GatewayError::InsufficientBalance {
                required,
                available,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<B: ChainBackend> LedgerGateway for EscrowGateway<B> {
    #[tracing::instrument(
        skip(self, request),
        fields(call = request.call.name(), purpose = request.label(), amount = %request.amount)
    )]
    async fn submit(&self, request: SubmitRequest) -> Result<ProvisionalRef> {
        request.payer.validate()?;
        request.payee.validate()?;
        self.check_fee_wallet().await?;
        self.check_amount(&request)?;
        self.check_payer_balance(&request).await?;

        let signer = if request.call.signed_by_platform() {
            &self.config.platform_wallet
        } else {
            &request.payer
        };
        let value = if request.call.is_payable() {
            request.amount
        } else {
            Wei::ZERO
        };

        let result = self
            .timed("send", self.backend.send(signer, &request.call, value))
            .await;

        match &result {
            Ok(provisional) => {
                metrics::counter!("ledger_submissions_total", "call" => request.call.name())
                    .increment(1);
                tracing::info!(tx_hash = %provisional.tx_hash, "transaction accepted for broadcast");
            }
            Err(e) => {
                metrics::counter!("ledger_submission_errors_total", "kind" => e.kind())
                    .increment(1);
                tracing::warn!(error = %e, "submission failed");
            }
        }
        result
    }

    async fn balance_of(&self, address: &WalletAddress) -> Result<Wei> {
        address.validate()?;
        self.timed("balance", self.backend.balance(address)).await
    }

    #[tracing::instrument(skip(self))]
    async fn receipt_of(&self, tx_hash: &TxHash) -> Result<Receipt> {
        self.timed("receipt", self.backend.receipt(tx_hash)).await
    }

    async fn events(&self, since_block: u64) -> Result<Vec<RawContractEvent>> {
        let head = self.head_block().await?;
        if since_block > head {
            return Ok(vec![]);
        }
        self.timed("logs", self.backend.logs(since_block, head)).await
    }

    async fn head_block(&self) -> Result<u64> {
        self.timed("block_number", self.backend.block_number()).await
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Option<OnChainBooking>> {
        self.timed("booking", self.backend.booking(booking_id)).await
    }

    async fn pending_withdrawal(&self, address: &WalletAddress) -> Result<Wei> {
        address.validate()?;
        self.timed("pending_withdrawal", self.backend.pending_withdrawal(address))
            .await
    }

    fn escrow_address(&self) -> &WalletAddress {
        &self.config.escrow_contract
    }

    fn platform_wallet(&self) -> &WalletAddress {
        &self.config.platform_wallet
    }

    fn fee_schedule(&self) -> &FeeSchedule {
        &self.config.fee_schedule
    }
}

//! In-process chain running the escrow contract.
//!
//! Transactions wait in a mempool until [`SimulatedChain::mine`] produces a
//! block, so tests decide exactly when confirmation happens. Faults can be
//! injected to exercise the retry and reconciliation paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{BookingId, FeeSchedule, TxHash, WalletAddress, Wei};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::ChainBackend;
use crate::error::{GatewayError, Result};
use crate::types::{
    ContractCall, ContractEvent, OnChainBooking, OnChainStatus, ProvisionalRef,
    RawContractEvent, Receipt,
};

/// Gas fee charged per transaction: 150k gas at 1 gwei.
pub const DEFAULT_GAS_FEE: Wei = Wei::new(150_000 * 1_000_000_000);

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub escrow_contract: WalletAddress,

    /// Contract owner; the only account allowed to release or cancel.
    pub owner: WalletAddress,

    pub fee_schedule: FeeSchedule,
    pub gas_fee: Wei,
}

impl ChainConfig {
    pub fn new(escrow_contract: WalletAddress, owner: WalletAddress) -> Self {
        Self {
            escrow_contract,
            owner,
            fee_schedule: FeeSchedule::default(),
            gas_fee: DEFAULT_GAS_FEE,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTx {
    hash: TxHash,
    from: WalletAddress,
    call: ContractCall,
    value: Wei,
    booking_id: Option<BookingId>,
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    balances: HashMap<WalletAddress, Wei>,
    pending_withdrawals: HashMap<WalletAddress, Wei>,
    bookings: BTreeMap<BookingId, OnChainBooking>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Sends left to fail with a network error.
    unavailable_sends: u32,
    offline: bool,
    latency: Option<Duration>,
}

#[derive(Debug)]
struct ChainState {
    config: ChainConfig,
    head: u64,
    ledger: Ledger,
    next_booking_id: u64,
    mempool: Vec<PendingTx>,
    receipts: HashMap<TxHash, Receipt>,
    logs: Vec<RawContractEvent>,
    faults: Faults,
    send_attempts: u32,
}

/// Simulated chain with the escrow contract deployed.
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    state: Arc<RwLock<ChainState>>,
}

impl SimulatedChain {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(ChainState {
                config,
                head: 0,
                ledger: Ledger::default(),
                next_booking_id: 1,
                mempool: Vec::new(),
                receipts: HashMap::new(),
                logs: Vec::new(),
                faults: Faults::default(),
                send_attempts: 0,
            })),
        }
    }

    /// Credits an account out of thin air.
    pub async fn fund(&self, address: &WalletAddress, amount: Wei) {
        let mut state = self.state.write().await;
        let balance = state.ledger.balances.entry(address.clone()).or_default();
        *balance = Wei::new(balance.as_u128().saturating_add(amount.as_u128()));
    }

    /// Sets an account balance, e.g. to drain the platform wallet.
    pub async fn set_balance(&self, address: &WalletAddress, amount: Wei) {
        let mut state = self.state.write().await;
        state.ledger.balances.insert(address.clone(), amount);
    }

    /// Fails the next `count` sends with a network error.
    pub async fn fail_next_sends(&self, count: u32) {
        self.state.write().await.faults.unavailable_sends = count;
    }

    /// Makes every call fail with a network error until switched back.
    pub async fn set_offline(&self, offline: bool) {
        self.state.write().await.faults.offline = offline;
    }

    /// Delays every send by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().await.faults.latency = latency;
    }

    /// Number of send calls received, including failed ones.
    pub async fn send_attempts(&self) -> u32 {
        self.state.read().await.send_attempts
    }

    pub async fn mempool_len(&self) -> usize {
        self.state.read().await.mempool.len()
    }

    /// Mines one block containing every pending transaction, in arrival order.
    pub async fn mine(&self) -> u64 {
        let mut state = self.state.write().await;
        state.head += 1;
        let block_number = state.head;
        let timestamp = Utc::now().timestamp();
        let gas_fee = state.config.gas_fee;
        let config = state.config.clone();

        let pending = std::mem::take(&mut state.mempool);
        let mut log_index = 0u32;

        for tx in pending {
            let mut scratch = state.ledger.clone();
            let outcome = execute(&config, &mut scratch, &tx, timestamp);

            // Gas is paid whether or not the call reverts.
            let receipt = match outcome {
                Ok(events) => {
                    state.ledger = scratch;
                    for event in events {
                        state.logs.push(RawContractEvent {
                            block_number,
                            log_index,
                            tx_hash: tx.hash.clone(),
                            event,
                        });
                        log_index += 1;
                    }
                    Receipt::Confirmed {
                        block_number,
                        gas_fee,
                    }
                }
                Err(reason) => {
                    tracing::debug!(tx_hash = %tx.hash, %reason, "transaction reverted");
                    Receipt::Reverted {
                        block_number,
                        gas_fee,
                        reason,
                    }
                }
            };
            charge_gas(&mut state.ledger, &tx.from, gas_fee);
            state.receipts.insert(tx.hash, receipt);
        }

        block_number
    }

    /// Mines a block every `interval` until the returned handle is aborted.
    pub fn run_miner(&self, interval: Duration) -> JoinHandle<()> {
        let chain = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let block = chain.mine().await;
                tracing::trace!(block, "mined block");
            }
        })
    }

    async fn check_online(&self) -> Result<()> {
        if self.state.read().await.faults.offline {
            return Err(GatewayError::NetworkUnavailable("node unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainBackend for SimulatedChain {
    async fn balance(&self, address: &WalletAddress) -> Result<Wei> {
        self.check_online().await?;
        let state = self.state.read().await;
        Ok(state.ledger.balances.get(address).copied().unwrap_or_default())
    }

    async fn send(
        &self,
        from: &WalletAddress,
        call: &ContractCall,
        value: Wei,
    ) -> Result<ProvisionalRef> {
        let latency = {
            let mut state = self.state.write().await;
            state.send_attempts += 1;
            if state.faults.offline {
                return Err(GatewayError::NetworkUnavailable("node unreachable".to_string()));
            }
            if state.faults.unavailable_sends > 0 {
                state.faults.unavailable_sends -= 1;
                return Err(GatewayError::NetworkUnavailable(
                    "connection reset by peer".to_string(),
                ));
            }
            state.faults.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.write().await;
        let gas_fee = state.config.gas_fee;
        let available = state.ledger.balances.get(from).copied().unwrap_or_default();
        let required = value
            .checked_add(gas_fee)
            .map_err(|e| GatewayError::Unknown(e.to_string()))?;
        if available < required {
            return Err(GatewayError::InsufficientBalance {
                required,
                available,
            });
        }

        let booking_id = match call {
            ContractCall::CreateBooking { .. } => Some(BookingId::new(state.next_booking_id)),
            _ => None,
        };
        let tx = PendingTx {
            hash: new_tx_hash(),
            from: from.clone(),
            call: call.clone(),
            value,
            booking_id,
        };

        // Gas estimation runs the call against the current state.
        let mut scratch = state.ledger.clone();
        execute(&state.config, &mut scratch, &tx, Utc::now().timestamp())
            .map_err(GatewayError::ContractRejected)?;

        if booking_id.is_some() {
            state.next_booking_id += 1;
        }
        state.receipts.insert(tx.hash.clone(), Receipt::Pending);
        let provisional = ProvisionalRef {
            tx_hash: tx.hash.clone(),
            booking_id,
        };
        state.mempool.push(tx);
        Ok(provisional)
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Receipt> {
        self.check_online().await?;
        let state = self.state.read().await;
        state
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| GatewayError::Unknown(format!("unknown transaction {tx_hash}")))
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawContractEvent>> {
        self.check_online().await?;
        let state = self.state.read().await;
        Ok(state
            .logs
            .iter()
            .filter(|log| log.block_number >= from_block && log.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn block_number(&self) -> Result<u64> {
        self.check_online().await?;
        Ok(self.state.read().await.head)
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Option<OnChainBooking>> {
        self.check_online().await?;
        Ok(self.state.read().await.ledger.bookings.get(&booking_id).cloned())
    }

    async fn pending_withdrawal(&self, address: &WalletAddress) -> Result<Wei> {
        self.check_online().await?;
        let state = self.state.read().await;
        Ok(state
            .ledger
            .pending_withdrawals
            .get(address)
            .copied()
            .unwrap_or_default())
    }
}

fn new_tx_hash() -> TxHash {
    TxHash::new(format!(
        "0x{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    ))
}

fn charge_gas(ledger: &mut Ledger, from: &WalletAddress, gas_fee: Wei) {
    let balance = ledger.balances.entry(from.clone()).or_default();
    *balance = balance.saturating_sub(gas_fee);
}

fn credit(map: &mut HashMap<WalletAddress, Wei>, address: &WalletAddress, amount: Wei) {
    let entry = map.entry(address.clone()).or_default();
    *entry = Wei::new(entry.as_u128().saturating_add(amount.as_u128()));
}

fn debit(
    map: &mut HashMap<WalletAddress, Wei>,
    address: &WalletAddress,
    amount: Wei,
) -> std::result::Result<(), String> {
    let entry = map.entry(address.clone()).or_default();
    *entry = entry
        .checked_sub(amount)
        .map_err(|_| format!("insufficient funds in {address}"))?;
    Ok(())
}

/// Runs one contract call. On error the caller discards `ledger`.
fn execute(
    config: &ChainConfig,
    ledger: &mut Ledger,
    tx: &PendingTx,
    timestamp: i64,
) -> std::result::Result<Vec<ContractEvent>, String> {
    match &tx.call {
        ContractCall::CreateBooking {
            property_id,
            start,
            end,
            rental_amount,
        } => {
            if rental_amount.is_zero() {
                return Err("Rental amount must be positive".to_string());
            }
            if end <= start {
                return Err("Invalid dates".to_string());
            }
            let (platform_fee, total) = config
                .fee_schedule
                .quote(*rental_amount)
                .map_err(|e| e.to_string())?;
            if tx.value != total {
                return Err("Incorrect payment amount".to_string());
            }
            let booking_id = tx
                .booking_id
                .ok_or_else(|| "Booking id not assigned".to_string())?;

            debit(&mut ledger.balances, &tx.from, tx.value)?;
            credit(&mut ledger.balances, &config.escrow_contract, tx.value);
            ledger.bookings.insert(
                booking_id,
                OnChainBooking {
                    booking_id,
                    property_id: property_id.clone(),
                    tenant: tx.from.clone(),
                    host: None,
                    rental_amount: *rental_amount,
                    platform_fee,
                    status: OnChainStatus::Confirmed,
                    funds_released: false,
                },
            );
            Ok(vec![
                ContractEvent::BookingCreated {
                    booking_id,
                    tenant: tx.from.clone(),
                    property_id: property_id.clone(),
                    total_amount: total,
                },
                ContractEvent::BookingConfirmed { booking_id },
            ])
        }
        ContractCall::CheckIn { booking_id } => {
            let booking = booking_mut(ledger, *booking_id)?;
            if booking.tenant != tx.from {
                return Err("Only tenant can check in".to_string());
            }
            if booking.status != OnChainStatus::Confirmed {
                return Err("Booking not confirmed".to_string());
            }
            booking.status = OnChainStatus::CheckedIn;
            Ok(vec![ContractEvent::CheckInCompleted {
                booking_id: *booking_id,
                timestamp,
            }])
        }
        ContractCall::CheckOut { booking_id } => {
            let booking = booking_mut(ledger, *booking_id)?;
            if booking.tenant != tx.from {
                return Err("Only tenant can check out".to_string());
            }
            if booking.status != OnChainStatus::CheckedIn {
                return Err("Not checked in".to_string());
            }
            booking.status = OnChainStatus::Completed;
            Ok(vec![
                ContractEvent::CheckOutCompleted {
                    booking_id: *booking_id,
                    timestamp,
                },
                ContractEvent::BookingCompleted {
                    booking_id: *booking_id,
                },
            ])
        }
        ContractCall::ReleaseFunds { booking_id, host } => {
            if tx.from != config.owner {
                return Err("Only owner can release funds".to_string());
            }
            let booking = booking_mut(ledger, *booking_id)?;
            if booking.status == OnChainStatus::Cancelled {
                return Err("Booking cancelled".to_string());
            }
            if booking.funds_released {
                return Err("Funds already released".to_string());
            }
            booking.funds_released = true;
            booking.host = Some(host.clone());
            let rental = booking.rental_amount;
            let fee = booking.platform_fee;
            let total = Wei::new(rental.as_u128().saturating_add(fee.as_u128()));

            debit(&mut ledger.balances, &config.escrow_contract, total)?;
            credit(&mut ledger.pending_withdrawals, host, rental);
            credit(&mut ledger.pending_withdrawals, &config.owner, fee);
            Ok(vec![ContractEvent::PaymentReleased {
                booking_id: *booking_id,
                owner: host.clone(),
                amount: rental,
            }])
        }
        ContractCall::CancelBooking { booking_id } => {
            if tx.from != config.owner {
                return Err("Only owner can cancel".to_string());
            }
            let booking = booking_mut(ledger, *booking_id)?;
            if booking.status != OnChainStatus::Confirmed || booking.funds_released {
                return Err("Cannot cancel booking".to_string());
            }
            booking.status = OnChainStatus::Cancelled;
            let tenant = booking.tenant.clone();
            let refund = Wei::new(
                booking
                    .rental_amount
                    .as_u128()
                    .saturating_add(booking.platform_fee.as_u128()),
            );

            debit(&mut ledger.balances, &config.escrow_contract, refund)?;
            credit(&mut ledger.balances, &tenant, refund);
            Ok(vec![ContractEvent::BookingCancelled {
                booking_id: *booking_id,
                refund_amount: refund,
            }])
        }
    }
}

fn booking_mut(
    ledger: &mut Ledger,
    booking_id: BookingId,
) -> std::result::Result<&mut OnChainBooking, String> {
    ledger
        .bookings
        .get_mut(&booking_id)
        .ok_or_else(|| format!("Booking {booking_id} does not exist"))
}

//! Escrow contract calls, receipts and events.

use chrono::NaiveDate;
use common::{BookingId, Purpose, TxHash, WalletAddress, Wei};
use serde::{Deserialize, Serialize};

/// A state-changing call on the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "camelCase")]
pub enum ContractCall {
    /// Payable: opens a booking and escrows rental plus fee.
    CreateBooking {
        property_id: String,
        start: NaiveDate,
        end: NaiveDate,
        rental_amount: Wei,
    },
    CheckIn {
        booking_id: BookingId,
    },
    CheckOut {
        booking_id: BookingId,
    },
    /// Admin only: pays the rental out to the host.
    ReleaseFunds {
        booking_id: BookingId,
        host: WalletAddress,
    },
    /// Admin only: returns the escrowed total to the tenant.
    CancelBooking {
        booking_id: BookingId,
    },
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::CreateBooking { .. } => "createBooking",
            ContractCall::CheckIn { .. } => "checkIn",
            ContractCall::CheckOut { .. } => "checkOut",
            ContractCall::ReleaseFunds { .. } => "releaseFunds",
            ContractCall::CancelBooking { .. } => "cancelBooking",
        }
    }

    /// True when the call transfers the request amount into escrow.
    pub fn is_payable(&self) -> bool {
        matches!(self, ContractCall::CreateBooking { .. })
    }

    /// True when the platform wallet signs the call instead of the payer.
    pub fn signed_by_platform(&self) -> bool {
        matches!(
            self,
            ContractCall::ReleaseFunds { .. } | ContractCall::CancelBooking { .. }
        )
    }

    pub fn booking_id(&self) -> Option<BookingId> {
        match self {
            ContractCall::CreateBooking { .. } => None,
            ContractCall::CheckIn { booking_id }
            | ContractCall::CheckOut { booking_id }
            | ContractCall::ReleaseFunds { booking_id, .. }
            | ContractCall::CancelBooking { booking_id } => Some(*booking_id),
        }
    }
}

/// A ledger transaction the saga wants broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub purpose: Option<Purpose>,
    pub payer: WalletAddress,
    pub payee: WalletAddress,
    pub amount: Wei,
    pub call: ContractCall,
}

impl SubmitRequest {
    /// A settlement transaction tracked in the transaction ledger.
    pub fn settlement(
        purpose: Purpose,
        payer: WalletAddress,
        payee: WalletAddress,
        amount: Wei,
        call: ContractCall,
    ) -> Self {
        Self {
            purpose: Some(purpose),
            payer,
            payee,
            amount,
            call,
        }
    }

    /// A non-monetary call (check-in, check-out) signed by `signer`.
    pub fn signal(signer: WalletAddress, escrow: WalletAddress, call: ContractCall) -> Self {
        Self {
            purpose: None,
            payer: signer,
            payee: escrow,
            amount: Wei::ZERO,
            call,
        }
    }

    pub fn label(&self) -> &'static str {
        self.purpose.map(|p| p.as_str()).unwrap_or(self.call.name())
    }
}

/// What the network handed back when it accepted a transaction for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalRef {
    pub tx_hash: TxHash,

    /// Booking ID assigned by the contract, when known at submission time.
    pub booking_id: Option<BookingId>,
}

/// Inclusion status of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Receipt {
    /// Broadcast but not yet in a block.
    Pending,
    Confirmed {
        block_number: u64,
        gas_fee: Wei,
    },
    /// Mined, but the contract reverted it.
    Reverted {
        block_number: u64,
        gas_fee: Wei,
        reason: String,
    },
}

impl Receipt {
    pub fn is_final(&self) -> bool {
        !matches!(self, Receipt::Pending)
    }
}

/// Events emitted by the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ContractEvent {
    BookingCreated {
        booking_id: BookingId,
        tenant: WalletAddress,
        property_id: String,
        total_amount: Wei,
    },
    BookingConfirmed {
        booking_id: BookingId,
    },
    BookingCancelled {
        booking_id: BookingId,
        refund_amount: Wei,
    },
    BookingCompleted {
        booking_id: BookingId,
    },
    CheckInCompleted {
        booking_id: BookingId,
        timestamp: i64,
    },
    CheckOutCompleted {
        booking_id: BookingId,
        timestamp: i64,
    },
    PaymentReleased {
        booking_id: BookingId,
        owner: WalletAddress,
        amount: Wei,
    },
}

impl ContractEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ContractEvent::BookingCreated { .. } => "BookingCreated",
            ContractEvent::BookingConfirmed { .. } => "BookingConfirmed",
            ContractEvent::BookingCancelled { .. } => "BookingCancelled",
            ContractEvent::BookingCompleted { .. } => "BookingCompleted",
            ContractEvent::CheckInCompleted { .. } => "CheckInCompleted",
            ContractEvent::CheckOutCompleted { .. } => "CheckOutCompleted",
            ContractEvent::PaymentReleased { .. } => "PaymentReleased",
        }
    }

    pub fn booking_id(&self) -> BookingId {
        match self {
            ContractEvent::BookingCreated { booking_id, .. }
            | ContractEvent::BookingConfirmed { booking_id }
            | ContractEvent::BookingCancelled { booking_id, .. }
            | ContractEvent::BookingCompleted { booking_id }
            | ContractEvent::CheckInCompleted { booking_id, .. }
            | ContractEvent::CheckOutCompleted { booking_id, .. }
            | ContractEvent::PaymentReleased { booking_id, .. } => *booking_id,
        }
    }
}

/// A contract log as read from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContractEvent {
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: TxHash,
    pub event: ContractEvent,
}

impl RawContractEvent {
    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

/// Booking as stored by the escrow contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnChainStatus {
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainBooking {
    pub booking_id: BookingId,
    pub property_id: String,
    pub tenant: WalletAddress,

    /// Set once funds are released.
    pub host: Option<WalletAddress>,
    pub rental_amount: Wei,
    pub platform_fee: Wei,
    pub status: OnChainStatus,
    pub funds_released: bool,
}

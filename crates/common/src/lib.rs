//! Value types shared by every crate in the escrow payment saga.

pub mod amount;
pub mod types;

pub use amount::{AmountError, FeeSchedule, WEI_PER_ETHER, Wei};
pub use types::{
    BookingId, InvalidAddress, Purpose, ReservationId, TransactionId, TxHash, WalletAddress,
};

pub mod error;
pub mod event;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod relay;
pub mod state;
pub mod store;

pub use error::{Result, StoreError};
pub use event::{EventEnvelope, EventId, Version};
pub use ledger::{ClaimOutcome, LedgerTransaction, Marked, NewClaim, TransactionStatus};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::TransactionQuery;
pub use relay::{ProcessedKey, RelayCursor};
pub use state::StateRecord;
pub use store::{LedgerStore, RelayStore, ReservationStore, SagaStore};

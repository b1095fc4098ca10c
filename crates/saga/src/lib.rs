//! Escrow payment saga.
//!
//! This crate drives a reservation's money through the escrow contract:
//! 1. `PaymentOrchestrator` claims a ledger row and submits the transaction
//! 2. `EventRelay` (or the webhook, or the sweeper) observes the receipt and
//!    publishes an outcome event
//! 3. `ReservationStateMachine` advances the reservation and issues the next
//!    command: release on checkout, refund on cancellation
//!
//! Components talk through the `InMemoryBus`; collaborators are reached
//! through the Remote Call Layer in [`services`].

pub mod bus;
pub mod command;
pub mod confirmation;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod relay;
pub mod retry;
pub mod runtime;
pub mod services;
pub mod state;
pub mod state_machine;
pub mod sweeper;

pub use bus::{BusError, CommandDispatcher, Delivery, EventPublisher, InMemoryBus};
pub use command::{CommandOutcome, SagaCommand};
pub use confirmation::{ConfirmationHandler, Settlement};
pub use error::{Result, SagaError};
pub use events::{OutcomeKind, OutcomePayload, SagaEvent};
pub use orchestrator::PaymentOrchestrator;
pub use relay::{EventRelay, RelayConfig, RelayReport};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use runtime::{SagaConfig, SagaRuntime, SagaTasks};
pub use services::{
    CallGuard, CatalogClient, CircuitBreaker, CircuitState, Collaborators, InMemoryCatalog,
    InMemoryUserDirectory, LogNotifier, Notification, NotificationKind, Notifier,
    RecordingNotifier, RemoteConfig, RemoteError, Resilient, UserDirectory,
};
pub use state::CommandStage;
pub use state_machine::ReservationStateMachine;
pub use sweeper::{ReconciliationSweeper, SweepReport, SweeperConfig};

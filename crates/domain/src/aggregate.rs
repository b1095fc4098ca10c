//! Core aggregate and domain event traits.

use common::ReservationId;
use ledger_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name recorded in the history log.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates persisted as current state plus a history log.
///
/// Command methods on an aggregate validate the request and return the
/// events describing the change; `apply` folds an event into the state and
/// must be pure and infallible.
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<ReservationId>;

    /// Version starts at 0 for a new aggregate and increments with each event.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Status label stored alongside the state for filtering.
    fn status_label(&self) -> &'static str;

    /// Applies an event to the aggregate, updating its state.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

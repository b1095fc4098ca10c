//! Command handling infrastructure.

use std::marker::PhantomData;

use common::ReservationId;
use ledger_store::{EventEnvelope, ReservationStore, StateRecord, StoreError, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// How many times a command is re-run after losing a compare-and-set race.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted. Empty for a no-op.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    /// True when the command changed nothing.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Trait for commands that can be executed against an aggregate.
pub trait Command: Send + Sync {
    /// The type of aggregate this command targets.
    type Aggregate: Aggregate;

    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> ReservationId;
}

/// Handler for executing commands against aggregates.
///
/// The handler:
/// 1. Loads the current state
/// 2. Runs the command to produce events
/// 3. Writes the new state and its history entries with compare-and-set
/// 4. Re-runs the command on a fresh load if another writer got there first
pub struct CommandHandler<S, A>
where
    S: ReservationStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: ReservationStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate, returning a default instance if it doesn't exist.
    pub async fn load(&self, aggregate_id: ReservationId) -> Result<A, DomainError> {
        match self.store.load_state(aggregate_id).await? {
            Some(record) => {
                let mut aggregate: A = record.decode()?;
                aggregate.set_version(record.version);
                Ok(aggregate)
            }
            None => Ok(A::default()),
        }
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: ReservationId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.id().is_some() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Executes a command against an aggregate that may not exist yet.
    pub async fn execute<F>(
        &self,
        aggregate_id: ReservationId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.run(aggregate_id, false, command_fn).await
    }

    /// Executes a command against an existing aggregate.
    ///
    /// Fails with [`DomainError::NotFound`] if the aggregate was never created.
    pub async fn execute_existing<F>(
        &self,
        aggregate_id: ReservationId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.run(aggregate_id, true, command_fn).await
    }

    async fn run<F>(
        &self,
        aggregate_id: ReservationId,
        require_existing: bool,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        for attempt in 0..=MAX_CONFLICT_RETRIES {
            let mut aggregate = self.load(aggregate_id).await?;
            if require_existing && aggregate.id().is_none() {
                return Err(DomainError::NotFound(aggregate_id));
            }
            let current_version = aggregate.version();

            let events = command_fn(&aggregate)?;
            if events.is_empty() {
                return Ok(CommandResult {
                    aggregate,
                    events,
                    new_version: current_version,
                });
            }

            let history = self.build_envelopes(aggregate_id, current_version, &events)?;
            for event in &events {
                aggregate.apply(event.clone());
            }
            let new_version = Version::new(current_version.as_i64() + events.len() as i64);
            aggregate.set_version(new_version);

            let record = StateRecord::from_state(
                aggregate_id,
                new_version,
                aggregate.status_label(),
                &aggregate,
            )?;

            match self.store.save_state(record, current_version, history).await {
                Ok(()) => {
                    for event in &events {
                        metrics::counter!("reservation_transitions_total", "event" => event.event_type())
                            .increment(1);
                    }
                    return Ok(CommandResult {
                        aggregate,
                        events,
                        new_version,
                    });
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    tracing::debug!(
                        reservation_id = %aggregate_id,
                        attempt,
                        "lost compare-and-set, reloading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DomainError::Contention(aggregate_id))
    }

    fn build_envelopes(
        &self,
        aggregate_id: ReservationId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::record(aggregate_id, version, event.event_type(), event)?
                .with_metadata("aggregate_type", serde_json::json!(A::aggregate_type()));
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}

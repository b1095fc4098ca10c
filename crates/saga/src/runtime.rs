//! Wiring of the saga components and their background loops.

use std::collections::HashMap;
use std::sync::Arc;

use ledger_gateway::LedgerGateway;
use ledger_store::SagaStore;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::{Delivery, InMemoryBus};
use crate::confirmation::ConfirmationHandler;
use crate::orchestrator::PaymentOrchestrator;
use crate::relay::{EventRelay, RelayConfig};
use crate::retry::{RetryPolicy, Sleeper};
use crate::services::Collaborators;
use crate::state_machine::ReservationStateMachine;
use crate::sweeper::{ReconciliationSweeper, SweeperConfig};

/// Settings for every saga component.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub retry: RetryPolicy,
    pub relay: RelayConfig,
    pub sweeper: SweeperConfig,
    /// Bus consumers running in parallel.
    pub workers: usize,
    /// Times an outcome event is handled before it is left to the sweeper.
    pub max_event_attempts: u32,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            relay: RelayConfig::default(),
            sweeper: SweeperConfig::default(),
            workers: 4,
            max_event_attempts: 5,
        }
    }
}

/// All saga components sharing one store, gateway and bus.
pub struct SagaRuntime<S: SagaStore> {
    pub bus: InMemoryBus,
    pub orchestrator: Arc<PaymentOrchestrator<S>>,
    pub state_machine: Arc<ReservationStateMachine<S>>,
    pub confirmations: Arc<ConfirmationHandler<S>>,
    pub relay: Arc<EventRelay<S>>,
    pub sweeper: Arc<ReconciliationSweeper<S>>,
    workers: usize,
    max_event_attempts: u32,
    /// Failed attempts per outcome event still on the bus.
    event_attempts: Mutex<HashMap<Uuid, u32>>,
}

impl<S: SagaStore + Clone + 'static> SagaRuntime<S> {
    pub fn new(
        store: S,
        gateway: Arc<dyn LedgerGateway>,
        collaborators: Collaborators,
        config: SagaConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self::with_bus(store, gateway, collaborators, config, sleeper, InMemoryBus::new())
    }

    /// Like [`SagaRuntime::new`] but on a caller-supplied bus.
    pub fn with_bus(
        store: S,
        gateway: Arc<dyn LedgerGateway>,
        collaborators: Collaborators,
        config: SagaConfig,
        sleeper: Arc<dyn Sleeper>,
        bus: InMemoryBus,
    ) -> Self {
        let publisher = Arc::new(bus.clone());
        let dispatcher = Arc::new(bus.clone());

        let confirmations = Arc::new(ConfirmationHandler::new(
            store.clone(),
            gateway.clone(),
            publisher.clone(),
        ));
        let orchestrator = Arc::new(
            PaymentOrchestrator::new(store.clone(), gateway.clone(), publisher.clone())
                .with_retry(config.retry)
                .with_sleeper(sleeper),
        );
        let state_machine = Arc::new(ReservationStateMachine::new(
            store.clone(),
            dispatcher.clone(),
            gateway.clone(),
            collaborators,
        ));
        let relay = Arc::new(EventRelay::new(
            store.clone(),
            gateway,
            confirmations.clone(),
            publisher.clone(),
            config.relay,
        ));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            store,
            confirmations.clone(),
            publisher,
            dispatcher,
            config.sweeper,
        ));

        Self {
            bus,
            orchestrator,
            state_machine,
            confirmations,
            relay,
            sweeper,
            workers: config.workers.max(1),
            max_event_attempts: config.max_event_attempts.max(1),
            event_attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Routes one bus message to its consumer.
    ///
    /// Outcome events that fail transiently go back on the bus until
    /// `max_event_attempts` is reached; after that the sweeper republishes
    /// them from the ledger rows. Failed commands are logged only.
    pub async fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Command(command) => {
                if let Err(e) = self.orchestrator.handle(command).await {
                    tracing::warn!(%command, error = %e, "command not completed");
                }
            }
            Delivery::Event(event) => {
                let result = self.state_machine.handle_event(&event).await;
                let mut attempts = self.event_attempts.lock().await;
                let e = match result {
                    Ok(()) => {
                        attempts.remove(&event.event_id);
                        return;
                    }
                    Err(e) => e,
                };
                if !e.is_transient() {
                    attempts.remove(&event.event_id);
                    tracing::warn!(
                        reservation_id = %event.reservation_id,
                        kind = %event.kind,
                        error = %e,
                        "outcome event not applied"
                    );
                    return;
                }

                let tried = {
                    let count = attempts.entry(event.event_id).or_insert(0);
                    *count += 1;
                    *count
                };
                if tried >= self.max_event_attempts {
                    attempts.remove(&event.event_id);
                    drop(attempts);
                    tracing::error!(
                        reservation_id = %event.reservation_id,
                        kind = %event.kind,
                        error = %e,
                        "outcome event abandoned, left to reconciliation"
                    );
                    metrics::counter!("saga_outcomes_abandoned_total", "kind" => event.kind.as_str())
                        .increment(1);
                    return;
                }
                drop(attempts);
                tracing::warn!(
                    reservation_id = %event.reservation_id,
                    kind = %event.kind,
                    attempt = tried,
                    error = %e,
                    "outcome event not applied, redelivering"
                );
                self.bus.redeliver(Delivery::Event(event)).await;
            }
        }
    }

    /// Handles queued messages until the bus is empty. Returns how many
    /// were handled.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        while let Some(delivery) = self.bus.try_next().await {
            self.deliver(delivery).await;
            handled += 1;
        }
        handled
    }

    /// Starts bus workers, the event relay and the sweeper.
    pub fn spawn(self: &Arc<Self>) -> SagaTasks {
        let (shutdown, rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.workers + 2);

        for worker in 0..self.workers {
            let runtime = Arc::clone(self);
            let mut rx = rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        delivery = runtime.bus.next() => match delivery {
                            Some(delivery) => runtime.deliver(delivery).await,
                            None => break,
                        },
                        _ = rx.changed() => break,
                    }
                }
                tracing::debug!(worker, "bus worker stopped");
            }));
        }

        let relay = Arc::clone(&self.relay);
        let relay_rx = rx.clone();
        handles.push(tokio::spawn(async move { relay.run(relay_rx).await }));

        let sweeper = Arc::clone(&self.sweeper);
        handles.push(tokio::spawn(async move { sweeper.run(rx).await }));

        tracing::info!(workers = self.workers, "saga runtime started");
        SagaTasks {
            shutdown,
            handles,
            bus: self.bus.clone(),
        }
    }
}

/// Handles of the background loops started by [`SagaRuntime::spawn`].
pub struct SagaTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    bus: InMemoryBus,
}

impl SagaTasks {
    /// Signals every loop to stop and waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.bus.close().await;
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "saga task panicked");
            }
        }
    }
}

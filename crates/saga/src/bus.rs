//! Message bus carrying saga commands and outcome events.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::command::SagaCommand;
use crate::events::{OutcomeKind, SagaEvent};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus closed")]
    Closed,
}

/// Publishes outcome events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SagaEvent) -> Result<(), BusError>;
}

/// Issues commands to the payment orchestrator.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: SagaCommand) -> Result<(), BusError>;
}

#[derive(Debug, Default)]
struct Queues {
    commands: VecDeque<SagaCommand>,
    events: VecDeque<SagaEvent>,
    /// Present only on a bus built with [`InMemoryBus::recording`].
    journal: Option<Journal>,
    closed: bool,
}

/// Everything that went through a recording bus.
#[derive(Debug, Default)]
struct Journal {
    published: Vec<SagaEvent>,
    dispatched: Vec<SagaCommand>,
}

/// A message received from the bus.
#[derive(Debug, Clone)]
pub enum Delivery {
    Command(SagaCommand),
    Event(SagaEvent),
}

/// In-process bus with a command queue and an event queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    queues: Arc<Mutex<Queues>>,
    notify: Arc<Notify>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that also keeps every published event and dispatched command
    /// for inspection. The journal is never trimmed.
    pub fn recording() -> Self {
        Self {
            queues: Arc::new(Mutex::new(Queues {
                journal: Some(Journal::default()),
                ..Queues::default()
            })),
            notify: Arc::default(),
        }
    }

    /// Takes the next queued message without waiting. Commands go first.
    pub async fn try_next(&self) -> Option<Delivery> {
        let mut queues = self.queues.lock().await;
        if let Some(command) = queues.commands.pop_front() {
            return Some(Delivery::Command(command));
        }
        queues.events.pop_front().map(Delivery::Event)
    }

    /// Waits for the next message; None once the bus is closed and drained.
    pub async fn next(&self) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_next().await {
                return Some(delivery);
            }
            if self.queues.lock().await.closed {
                return None;
            }
            notified.await;
        }
    }

    /// Puts a message back at the end of its queue.
    pub async fn redeliver(&self, delivery: Delivery) {
        let mut queues = self.queues.lock().await;
        match delivery {
            Delivery::Command(command) => queues.commands.push_back(command),
            Delivery::Event(event) => queues.events.push_back(event),
        }
        drop(queues);
        self.notify.notify_one();
    }

    pub async fn close(&self) {
        self.queues.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Every event published so far; empty unless recording.
    pub async fn published(&self) -> Vec<SagaEvent> {
        self.queues
            .lock()
            .await
            .journal
            .as_ref()
            .map(|j| j.published.clone())
            .unwrap_or_default()
    }

    pub async fn published_count(&self, kind: OutcomeKind) -> usize {
        self.queues
            .lock()
            .await
            .journal
            .as_ref()
            .map_or(0, |j| j.published.iter().filter(|e| e.kind == kind).count())
    }

    /// Every command dispatched so far; empty unless recording.
    pub async fn dispatched(&self) -> Vec<SagaCommand> {
        self.queues
            .lock()
            .await
            .journal
            .as_ref()
            .map(|j| j.dispatched.clone())
            .unwrap_or_default()
    }

    pub async fn pending(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.commands.len() + queues.events.len()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, event: SagaEvent) -> Result<(), BusError> {
        let mut queues = self.queues.lock().await;
        if queues.closed {
            return Err(BusError::Closed);
        }
        tracing::debug!(
            reservation_id = %event.reservation_id,
            kind = %event.kind,
            "publishing outcome event"
        );
        metrics::counter!("saga_outcomes_total", "kind" => event.kind.as_str()).increment(1);
        if let Some(journal) = queues.journal.as_mut() {
            journal.published.push(event.clone());
        }
        queues.events.push_back(event);
        drop(queues);
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl CommandDispatcher for InMemoryBus {
    async fn dispatch(&self, command: SagaCommand) -> Result<(), BusError> {
        let mut queues = self.queues.lock().await;
        if queues.closed {
            return Err(BusError::Closed);
        }
        tracing::debug!(%command, "dispatching command");
        if let Some(journal) = queues.journal.as_mut() {
            journal.dispatched.push(command);
        }
        queues.commands.push_back(command);
        drop(queues);
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Purpose, ReservationId};

    #[tokio::test]
    async fn commands_are_delivered_before_events() {
        let bus = InMemoryBus::recording();
        let id = ReservationId::new();
        bus.publish(SagaEvent::failed(id, Purpose::Payment, None, "x"))
            .await
            .unwrap();
        bus.dispatch(SagaCommand::InitiatePayment { reservation_id: id })
            .await
            .unwrap();

        assert!(matches!(bus.try_next().await, Some(Delivery::Command(_))));
        assert!(matches!(bus.try_next().await, Some(Delivery::Event(_))));
        assert!(bus.try_next().await.is_none());
        assert_eq!(bus.published_count(OutcomeKind::PaymentFailed).await, 1);
    }

    #[tokio::test]
    async fn plain_bus_keeps_no_journal() {
        let bus = InMemoryBus::new();
        let id = ReservationId::new();
        for _ in 0..50 {
            bus.dispatch(SagaCommand::Refund { reservation_id: id })
                .await
                .unwrap();
            bus.publish(SagaEvent::failed(id, Purpose::Refund, None, "x"))
                .await
                .unwrap();
            while bus.try_next().await.is_some() {}
        }

        assert_eq!(bus.pending().await, 0);
        assert!(bus.dispatched().await.is_empty());
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn redelivered_event_goes_to_the_back() {
        let bus = InMemoryBus::new();
        let first = SagaEvent::failed(ReservationId::new(), Purpose::Payment, None, "first");
        let second = SagaEvent::failed(ReservationId::new(), Purpose::Payment, None, "second");
        bus.publish(first.clone()).await.unwrap();
        bus.publish(second.clone()).await.unwrap();

        let Some(taken) = bus.try_next().await else {
            panic!("expected a delivery");
        };
        bus.redeliver(taken).await;

        assert!(matches!(bus.try_next().await, Some(Delivery::Event(e)) if e == second));
        assert!(matches!(bus.try_next().await, Some(Delivery::Event(e)) if e == first));
    }

    #[tokio::test]
    async fn next_returns_none_after_close() {
        let bus = InMemoryBus::new();
        bus.close().await;
        assert!(bus.next().await.is_none());
        assert!(
            bus.dispatch(SagaCommand::Refund {
                reservation_id: ReservationId::new()
            })
            .await
            .is_err()
        );
    }
}

//! Notification collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use common::{ReservationId, WalletAddress};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BookingConfirmed,
    PaymentFailed,
    BookingCancelled,
    EscrowReleased,
    RefundProcessed,
}

/// A message for a tenant or host. Rendering and delivery belong to the
/// notification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub reservation_id: ReservationId,
    pub kind: NotificationKind,
    pub recipient: Option<WalletAddress>,
    pub detail: Option<String>,
}

impl Notification {
    pub fn new(
        reservation_id: ReservationId,
        kind: NotificationKind,
        recipient: Option<WalletAddress>,
    ) -> Self {
        Self {
            reservation_id,
            kind,
            recipient,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), RemoteError>;
}

/// Keeps notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }
}

/// Writes each notification to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), RemoteError> {
        tracing::info!(
            reservation_id = %notification.reservation_id,
            kind = ?notification.kind,
            recipient = notification.recipient.as_ref().map(|r| r.as_str()),
            detail = notification.detail.as_deref(),
            "notification"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), RemoteError> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

//! Fallback wrappers around collaborator clients.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ReservationId, WalletAddress};

use super::breaker::{CallGuard, RemoteConfig};
use super::{CatalogClient, Notification, Notifier, RemoteError, UserDirectory};

/// A collaborator client behind a timeout, a circuit breaker and a fallback.
///
/// Calls through a `Resilient` client never fail: when the guarded call
/// errors the fallback answer is returned instead and the failure is logged
/// and counted, so an unavailable collaborator cannot stall the saga.
pub struct Resilient<C> {
    inner: C,
    guard: CallGuard,
}

impl<C> Resilient<C> {
    pub fn new(name: &'static str, inner: C, config: RemoteConfig) -> Self {
        Self {
            inner,
            guard: CallGuard::new(name, config),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn guard(&self) -> &CallGuard {
        &self.guard
    }

    fn fallback(&self, operation: &'static str, error: &RemoteError) {
        metrics::counter!("remote_calls_fallback_total", "collaborator" => self.guard.name())
            .increment(1);
        tracing::warn!(
            collaborator = self.guard.name(),
            operation,
            %error,
            "remote call failed, using fallback"
        );
    }
}

#[async_trait]
impl<C: CatalogClient> CatalogClient for Resilient<C> {
    async fn block_dates(
        &self,
        property_id: &str,
        reservation_id: ReservationId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(), RemoteError> {
        let call = self.inner.block_dates(property_id, reservation_id, from, to);
        if let Err(e) = self.guard.call(call).await {
            self.fallback("block_dates", &e);
        }
        Ok(())
    }

    async fn unblock_dates(
        &self,
        property_id: &str,
        reservation_id: ReservationId,
    ) -> Result<(), RemoteError> {
        let call = self.inner.unblock_dates(property_id, reservation_id);
        if let Err(e) = self.guard.call(call).await {
            self.fallback("unblock_dates", &e);
        }
        Ok(())
    }

    async fn property_owner(&self, property_id: &str) -> Result<Option<String>, RemoteError> {
        match self.guard.call(self.inner.property_owner(property_id)).await {
            Ok(owner) => Ok(owner),
            Err(e) => {
                self.fallback("property_owner", &e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<C: UserDirectory> UserDirectory for Resilient<C> {
    async fn wallet_of(&self, user_id: &str) -> Result<Option<WalletAddress>, RemoteError> {
        match self.guard.call(self.inner.wallet_of(user_id)).await {
            Ok(wallet) => Ok(wallet),
            Err(e) => {
                self.fallback("wallet_of", &e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<C: Notifier> Notifier for Resilient<C> {
    async fn notify(&self, notification: Notification) -> Result<(), RemoteError> {
        let kind = notification.kind;
        let reservation_id = notification.reservation_id;
        if let Err(e) = self.guard.call(self.inner.notify(notification)).await {
            self.fallback("notify", &e);
            tracing::info!(%reservation_id, ?kind, "notification dropped");
        }
        Ok(())
    }
}

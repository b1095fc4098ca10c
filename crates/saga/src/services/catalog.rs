//! Catalog collaborator: property calendars and ownership.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::ReservationId;
use tokio::sync::RwLock;

use super::RemoteError;

/// Calendar blocks and property ownership, owned by the catalog service.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Blocks the property's calendar for a confirmed reservation.
    async fn block_dates(
        &self,
        property_id: &str,
        reservation_id: ReservationId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(), RemoteError>;

    /// Frees the dates held for a reservation.
    async fn unblock_dates(
        &self,
        property_id: &str,
        reservation_id: ReservationId,
    ) -> Result<(), RemoteError>;

    /// User ID of the property owner.
    async fn property_owner(&self, property_id: &str) -> Result<Option<String>, RemoteError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    owners: HashMap<String, String>,
    blocked: HashMap<ReservationId, (String, NaiveDate, NaiveDate)>,
    unavailable: bool,
}

/// In-memory catalog for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_owner(&self, property_id: impl Into<String>, owner_id: impl Into<String>) {
        self.state
            .write()
            .await
            .owners
            .insert(property_id.into(), owner_id.into());
    }

    /// Makes every call fail as if the service were down.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn is_blocked(&self, reservation_id: ReservationId) -> bool {
        self.state.read().await.blocked.contains_key(&reservation_id)
    }

    async fn check(&self) -> Result<(), RemoteError> {
        if self.state.read().await.unavailable {
            return Err(RemoteError::Unavailable(
                "catalog",
                "service unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn block_dates(
        &self,
        property_id: &str,
        reservation_id: ReservationId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(), RemoteError> {
        self.check().await?;
        self.state
            .write()
            .await
            .blocked
            .insert(reservation_id, (property_id.to_string(), from, to));
        Ok(())
    }

    async fn unblock_dates(
        &self,
        _property_id: &str,
        reservation_id: ReservationId,
    ) -> Result<(), RemoteError> {
        self.check().await?;
        self.state.write().await.blocked.remove(&reservation_id);
        Ok(())
    }

    async fn property_owner(&self, property_id: &str) -> Result<Option<String>, RemoteError> {
        self.check().await?;
        Ok(self.state.read().await.owners.get(property_id).cloned())
    }
}

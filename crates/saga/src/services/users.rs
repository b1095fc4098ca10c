//! User collaborator: wallet lookups.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::WalletAddress;
use tokio::sync::RwLock;

use super::RemoteError;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Wallet registered by a user, if any.
    async fn wallet_of(&self, user_id: &str) -> Result<Option<WalletAddress>, RemoteError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    wallets: Arc<RwLock<HashMap<String, WalletAddress>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_wallet(&self, user_id: impl Into<String>, wallet: WalletAddress) {
        self.wallets.write().await.insert(user_id.into(), wallet);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn wallet_of(&self, user_id: &str) -> Result<Option<WalletAddress>, RemoteError> {
        Ok(self.wallets.read().await.get(user_id).cloned())
    }
}

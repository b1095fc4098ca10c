//! Remote Call Layer: collaborator clients used by the saga.
//!
//! Each collaborator (catalog, users, notifications) is a trait with an
//! in-memory implementation. [`Resilient`] adds a timeout, a circuit breaker
//! and a fallback answer on top of any implementation.

pub mod breaker;
pub mod catalog;
pub mod notifications;
pub mod resilient;
pub mod users;

use std::sync::Arc;

use thiserror::Error;

pub use breaker::{CallGuard, CircuitBreaker, CircuitState, RemoteConfig};
pub use catalog::{CatalogClient, InMemoryCatalog};
pub use notifications::{
    LogNotifier, Notification, NotificationKind, Notifier, RecordingNotifier,
};
pub use resilient::Resilient;
pub use users::{InMemoryUserDirectory, UserDirectory};

/// Errors from collaborator calls.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("{0} did not answer in time")]
    Timeout(&'static str),

    #[error("Circuit open for {0}")]
    CircuitOpen(&'static str),

    #[error("{0} unavailable: {1}")]
    Unavailable(&'static str, String),
}

/// The collaborators the saga talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogClient>,
    pub users: Arc<dyn UserDirectory>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            catalog,
            users,
            notifier,
        }
    }

    /// Wraps each client in [`Resilient`].
    pub fn resilient<C, U, N>(config: RemoteConfig, catalog: C, users: U, notifier: N) -> Self
    where
        C: CatalogClient + 'static,
        U: UserDirectory + 'static,
        N: Notifier + 'static,
    {
        Self {
            catalog: Arc::new(Resilient::new("catalog", catalog, config)),
            users: Arc::new(Resilient::new("users", users, config)),
            notifier: Arc::new(Resilient::new("notifications", notifier, config)),
        }
    }
}

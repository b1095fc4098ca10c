//! Circuit breaker and timeout guard for collaborator calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Stops calling a collaborator after repeated failures.
///
/// After `failure_threshold` consecutive failures the circuit opens and
/// calls fail fast. Once `open_for` has elapsed a single trial call is let
/// through: success closes the circuit, failure opens it again.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    open_for: Duration,
    state: Arc<RwLock<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            open_for,
            state: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            })),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    /// Checks whether a call may proceed, moving Open to HalfOpen when due.
    async fn try_acquire(&self) -> Result<(), RemoteError> {
        let mut state = self.state.write().await;
        if state.state == CircuitState::Open {
            let due = state
                .opened_at
                .is_some_and(|opened| opened.elapsed() >= self.open_for);
            if !due {
                return Err(RemoteError::CircuitOpen(self.name));
            }
            tracing::info!(collaborator = self.name, "circuit half-open, trying a call");
            state.state = CircuitState::HalfOpen;
        }
        Ok(())
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        if state.state == CircuitState::HalfOpen {
            tracing::info!(collaborator = self.name, "circuit closed");
        }
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.opened_at = None;
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::HalfOpen => {
                tracing::warn!(collaborator = self.name, "trial call failed, circuit open");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.failure_threshold {
                    tracing::warn!(
                        collaborator = self.name,
                        failures = state.failure_count,
                        "circuit tripped"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Settings shared by every collaborator client.
#[derive(Debug, Clone, Copy)]
pub struct RemoteConfig {
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub open_for: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
        }
    }
}

/// Timeout plus circuit breaker around calls to one collaborator.
#[derive(Debug, Clone)]
pub struct CallGuard {
    name: &'static str,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl CallGuard {
    pub fn new(name: &'static str, config: RemoteConfig) -> Self {
        Self {
            name,
            timeout: config.timeout,
            breaker: CircuitBreaker::new(name, config.failure_threshold, config.open_for),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T, RemoteError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.breaker.try_acquire().await?;

        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.name)),
        };

        match &result {
            Ok(_) => self.breaker.on_success().await,
            Err(_) => self.breaker.on_failure().await,
        }
        result
    }
}

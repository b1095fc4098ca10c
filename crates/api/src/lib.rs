//! HTTP API server for the escrow payment saga.
//!
//! Provides REST endpoints for reservations, payments and ledger webhooks,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::Wei;
use ledger_gateway::{EscrowGateway, LedgerGateway, SimulatedChain};
use ledger_store::SagaStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Collaborators, SagaRuntime, Sleeper};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore> {
    pub runtime: Arc<SagaRuntime<S>>,
    pub gateway: Arc<dyn LedgerGateway>,
}

/// Credits the platform wallet and every configured dev wallet on the
/// simulated chain.
pub async fn fund_dev_wallets(chain: &SimulatedChain, config: &Config, amount: Wei) {
    chain.fund(&config.platform_wallet, amount).await;
    for wallet in &config.dev_funded_wallets {
        chain.fund(wallet, amount).await;
    }
    tracing::info!(
        wallets = config.dev_funded_wallets.len() + 1,
        %amount,
        "funded dev wallets"
    );
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{payments, reservations, webhooks};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/reservations",
            post(reservations::create::<S>).get(reservations::list::<S>),
        )
        .route("/reservations/{id}", get(reservations::get::<S>))
        .route("/reservations/{id}/events", get(reservations::events::<S>))
        .route("/reservations/{id}/check-in", post(reservations::check_in::<S>))
        .route("/reservations/{id}/check-out", post(reservations::check_out::<S>))
        .route("/reservations/{id}/cancel", post(reservations::cancel::<S>))
        .route(
            "/reservations/{id}/retry-payment",
            post(reservations::retry_payment::<S>),
        )
        .route("/payments", post(payments::create::<S>))
        .route("/payments/reservation/{id}", get(payments::by_reservation::<S>))
        .route(
            "/payments/reservation/{id}/release",
            post(payments::release::<S>),
        )
        .route("/payments/reservation/{id}/refund", post(payments::refund::<S>))
        .route("/payments/tx/{hash}", get(payments::by_hash::<S>))
        .route("/payments/balance/{address}", get(payments::balance::<S>))
        .route("/webhooks/ledger", post(webhooks::ledger::<S>))
        .route("/webhooks/verify", get(webhooks::verify))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the saga runtime over `store`, settling on `chain`.
pub fn create_state<S: SagaStore + Clone + 'static>(
    store: S,
    config: &Config,
    chain: SimulatedChain,
    collaborators: Collaborators,
    sleeper: Arc<dyn Sleeper>,
) -> Arc<AppState<S>> {
    let gateway: Arc<dyn LedgerGateway> =
        Arc::new(EscrowGateway::new(chain, config.gateway_config()));
    let runtime = SagaRuntime::new(
        store,
        gateway.clone(),
        collaborators,
        config.saga_config(),
        sleeper,
    );

    Arc::new(AppState {
        runtime: Arc::new(runtime),
        gateway,
    })
}

//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use common::Wei;
use ledger_gateway::SimulatedChain;
use ledger_store::{InMemoryStore, PostgresStore, SagaStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Collaborators, InMemoryCatalog, InMemoryUserDirectory, LogNotifier, TokioSleeper};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            serve(config, store, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            serve(config, InMemoryStore::new(), metrics_handle).await;
        }
    }
}

async fn serve<S: SagaStore + Clone + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    // 4. Simulated chain and collaborators
    let chain = SimulatedChain::new(config.chain_config());
    api::fund_dev_wallets(&chain, &config, Wei::ether(1_000)).await;
    let miner = chain.run_miner(config.block_time);

    let collaborators = Collaborators::resilient(
        config.remote_config(),
        InMemoryCatalog::new(),
        InMemoryUserDirectory::new(),
        LogNotifier,
    );

    // 5. Build state and start the saga loops
    let state = api::create_state(
        store,
        &config,
        chain,
        collaborators,
        Arc::new(TokioSleeper),
    );
    let tasks = state.runtime.spawn();

    // 6. Build the application and start the server
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tasks.shutdown().await;
    miner.abort();
    tracing::info!("server shut down gracefully");
}

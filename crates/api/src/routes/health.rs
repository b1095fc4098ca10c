//! Liveness plus a ledger reachability probe.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ledger_store::SagaStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ledger_head: Option<u64>,
}

/// GET /health: "degraded" when the ledger cannot be reached.
pub async fn check<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    match state.gateway.head_block().await {
        Ok(head) => Json(HealthResponse {
            status: "ok",
            ledger_head: Some(head),
        }),
        Err(error) => {
            tracing::warn!(%error, "ledger unreachable during health check");
            Json(HealthResponse {
                status: "degraded",
                ledger_head: None,
            })
        }
    }
}

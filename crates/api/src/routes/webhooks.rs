//! Confirmation callbacks from an external ledger watcher.
//!
//! The payload is only a hint. The receipt is always fetched through the
//! gateway and applied through the same confirmation path as the relay.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use common::TxHash;
use ledger_store::SagaStore;
use saga::Settlement;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct LedgerWebhook {
    pub event_type: String,
    pub transaction_hash: String,
    #[serde(default)]
    pub confirmed: Option<bool>,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub transaction_hash: String,
    pub settlement: &'static str,
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub challenge: Option<String>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub challenge: String,
}

/// POST /webhooks/ledger
#[tracing::instrument(skip(state, payload), fields(event_type = %payload.event_type))]
pub async fn ledger<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(payload): Json<LedgerWebhook>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if payload.transaction_hash.trim().is_empty() {
        return Err(ApiError::BadRequest("transaction_hash is required".to_string()));
    }
    let tx_hash = TxHash::new(payload.transaction_hash.trim());
    metrics::counter!("webhook_callbacks_total").increment(1);

    let settlement = state.runtime.confirmations.settle_hash(&tx_hash).await?;
    let label = match settlement {
        Settlement::Pending => "PENDING",
        Settlement::Confirmed => "CONFIRMED",
        Settlement::Failed => "FAILED",
        Settlement::AlreadySettled => "ALREADY_SETTLED",
    };

    if let Some(claimed) = payload.confirmed
        && claimed != matches!(settlement, Settlement::Confirmed | Settlement::AlreadySettled)
    {
        tracing::warn!(%tx_hash, claimed, settlement = label, "webhook disagrees with receipt");
    }
    tracing::info!(%tx_hash, settlement = label, "webhook processed");

    Ok(Json(WebhookResponse {
        transaction_hash: tx_hash.to_string(),
        settlement: label,
    }))
}

/// GET /webhooks/verify?challenge=...: echoes the challenge back.
pub async fn verify(Query(query): Query<VerifyQuery>) -> Result<Json<VerifyResponse>, ApiError> {
    query
        .challenge
        .filter(|c| !c.is_empty())
        .map(|challenge| Json(VerifyResponse { challenge }))
        .ok_or_else(|| ApiError::BadRequest("challenge is required".to_string()))
}

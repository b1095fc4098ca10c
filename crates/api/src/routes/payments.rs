//! Payment endpoints: start a payment, settle escrow, query the ledger.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Purpose, ReservationId, TxHash, WalletAddress, Wei};
use ledger_store::{LedgerTransaction, SagaStore, TransactionStatus};
use saga::{CommandOutcome, SagaCommand};
use serde::{Deserialize, Serialize};

use super::reservations::{parse_reservation_id, parse_wallet};
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub reservation_id: String,
}

/// Result of a payment command.
///
/// `status` is `PROCESSING` until the transaction is seen in a block;
/// accepted-for-broadcast is never reported as success.
#[derive(Serialize)]
pub struct PaymentResponse {
    pub reservation_id: ReservationId,
    pub purpose: Purpose,
    pub status: TransactionStatus,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: WalletAddress,
    pub balance: Wei,
    pub pending_withdrawal: Wei,
}

/// POST /payments: issue INITIATE_PAYMENT for a reservation.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let reservation_id = parse_reservation_id(&req.reservation_id)?;
    run(&state, SagaCommand::InitiatePayment { reservation_id }).await
}

/// POST /payments/reservation/{id}/release
#[tracing::instrument(skip(state))]
pub async fn release<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    run(&state, SagaCommand::ReleaseEscrow { reservation_id }).await
}

/// POST /payments/reservation/{id}/refund
#[tracing::instrument(skip(state))]
pub async fn refund<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    run(&state, SagaCommand::Refund { reservation_id }).await
}

/// GET /payments/reservation/{id}: every ledger row of a reservation, oldest first.
#[tracing::instrument(skip(state))]
pub async fn by_reservation<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LedgerTransaction>>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    Ok(Json(
        state.runtime.orchestrator.transactions(reservation_id).await?,
    ))
}

/// GET /payments/tx/{hash}
#[tracing::instrument(skip(state))]
pub async fn by_hash<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(hash): Path<String>,
) -> Result<Json<LedgerTransaction>, ApiError> {
    let tx_hash = TxHash::new(hash);
    Ok(Json(
        state.runtime.orchestrator.transaction_by_hash(&tx_hash).await?,
    ))
}

/// GET /payments/balance/{address}: on-chain balance and escrow withdrawals owed.
#[tracing::instrument(skip(state))]
pub async fn balance<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(address): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let address = parse_wallet("address", &address)?;
    let balance = state.gateway.balance_of(&address).await?;
    let pending_withdrawal = state.gateway.pending_withdrawal(&address).await?;
    Ok(Json(BalanceResponse {
        address,
        balance,
        pending_withdrawal,
    }))
}

async fn run<S: SagaStore + Clone + 'static>(
    state: &AppState<S>,
    command: SagaCommand,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let outcome = state.runtime.orchestrator.handle(command).await?;
    let (code, status) = match &outcome {
        // Abandoned: the target state was reached through another path.
        CommandOutcome::AlreadyConfirmed { .. } | CommandOutcome::Abandoned { .. } => {
            (StatusCode::OK, TransactionStatus::Confirmed)
        }
        CommandOutcome::Submitted { .. } | CommandOutcome::InProgress { .. } => {
            (StatusCode::ACCEPTED, TransactionStatus::Processing)
        }
        CommandOutcome::Failed { .. } => (StatusCode::UNPROCESSABLE_ENTITY, TransactionStatus::Failed),
    };

    Ok((
        code,
        Json(PaymentResponse {
            reservation_id: command.reservation_id(),
            purpose: command.purpose(),
            status,
            outcome,
        }),
    ))
}

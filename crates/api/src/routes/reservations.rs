//! Reservation lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use common::{ReservationId, TxHash, WalletAddress, Wei};
use domain::{
    Aggregate, CancelReservation, CheckIn, CheckOut, CreateReservation, Reservation,
    ReservationStatus,
};
use ledger_store::SagaStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateReservationRequest {
    pub property_id: String,
    pub tenant_wallet: String,
    /// Resolved through the catalog and user directory when omitted.
    pub host_wallet: Option<String>,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    /// Rental before the platform fee, in ether (e.g. `"1.5"`).
    pub rental_amount: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationResponse {
    pub id: String,
    pub property_id: String,
    pub tenant_wallet: Option<WalletAddress>,
    pub host_wallet: Option<WalletAddress>,
    pub check_in_date: Option<NaiveDate>,
    pub check_out_date: Option<NaiveDate>,
    pub rental_amount: Wei,
    pub platform_fee: Wei,
    pub total_amount: Wei,
    pub status: ReservationStatus,
    pub payment_confirmed: bool,
    pub payment_failed: bool,
    pub escrow_released: bool,
    pub refunded: bool,
    pub last_failure: Option<String>,
    pub cancellation_reason: Option<String>,
    pub payment_tx: Option<TxHash>,
    pub release_tx: Option<TxHash>,
    pub refund_tx: Option<TxHash>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Reservation> for ReservationResponse {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id().map(|id| id.to_string()).unwrap_or_default(),
            property_id: r.property_id().to_string(),
            tenant_wallet: r.tenant_wallet().cloned(),
            host_wallet: r.host_wallet().cloned(),
            check_in_date: r.check_in_date(),
            check_out_date: r.check_out_date(),
            rental_amount: r.rental_amount(),
            platform_fee: r.platform_fee(),
            total_amount: r.total_amount(),
            status: r.status(),
            payment_confirmed: r.payment_confirmed(),
            payment_failed: r.payment_failed(),
            escrow_released: r.escrow_released(),
            refunded: r.refunded(),
            last_failure: r.last_failure().map(String::from),
            cancellation_reason: r.cancellation_reason().map(String::from),
            payment_tx: r.payment_tx().cloned(),
            release_tx: r.release_tx().cloned(),
            refund_tx: r.refund_tx().cloned(),
            created_at: r.created_at(),
            updated_at: r.updated_at(),
        }
    }
}

/// Response type for history entries.
#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub reservation_id: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

// -- Handlers --

/// POST /reservations: create a PENDING reservation and start its payment.
#[tracing::instrument(skip(state, req), fields(property_id = %req.property_id))]
pub async fn create<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let tenant_wallet = parse_wallet("tenant_wallet", &req.tenant_wallet)?;
    let rental_amount = Wei::parse_ether(&req.rental_amount)
        .map_err(|e| ApiError::BadRequest(format!("Invalid rental_amount: {e}")))?;

    let host_wallet = match &req.host_wallet {
        Some(raw) => parse_wallet("host_wallet", raw)?,
        None => state
            .runtime
            .state_machine
            .resolve_host_wallet(&req.property_id)
            .await?
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "No host wallet known for property {}",
                    req.property_id
                ))
            })?,
    };

    let cmd = CreateReservation::new(
        req.property_id,
        tenant_wallet,
        host_wallet,
        req.check_in_date,
        req.check_out_date,
        rental_amount,
    );
    let reservation = state.runtime.state_machine.create(cmd).await?;

    Ok((StatusCode::CREATED, Json(ReservationResponse::from(&reservation))))
}

/// GET /reservations: list reservations, optionally by `?status=`.
#[tracing::instrument(skip(state, query))]
pub async fn list<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ReservationResponse>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ReservationStatus>)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Invalid status filter".to_string()))?;

    let reservations = state.runtime.state_machine.reservations().list(status).await?;
    Ok(Json(
        reservations.iter().map(ReservationResponse::from).collect(),
    ))
}

/// GET /reservations/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    let reservation = state
        .runtime
        .state_machine
        .reservations()
        .get(reservation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Reservation {id} not found")))?;

    Ok(Json(ReservationResponse::from(&reservation)))
}

/// GET /reservations/{id}/events: the reservation's transition history.
#[tracing::instrument(skip(state))]
pub async fn events<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    let envelopes = state
        .runtime
        .state_machine
        .reservations()
        .history(reservation_id)
        .await?;

    let responses = envelopes
        .into_iter()
        .map(|e| EventEnvelopeResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            reservation_id: e.reservation_id.to_string(),
            version: e.version.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}

/// POST /reservations/{id}/check-in
#[tracing::instrument(skip(state))]
pub async fn check_in<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    let reservation = state
        .runtime
        .state_machine
        .check_in(CheckIn::now(reservation_id))
        .await?;
    Ok(Json(ReservationResponse::from(&reservation)))
}

/// POST /reservations/{id}/check-out: completes the stay and releases escrow.
#[tracing::instrument(skip(state))]
pub async fn check_out<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    let reservation = state
        .runtime
        .state_machine
        .check_out(CheckOut::now(reservation_id))
        .await?;
    Ok(Json(ReservationResponse::from(&reservation)))
}

/// POST /reservations/{id}/cancel: cancels and refunds a funded escrow.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    req: Option<Json<CancelRequest>>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    let reason = req
        .and_then(|Json(body)| body.reason)
        .unwrap_or_else(|| "cancelled by guest".to_string());

    let reservation = state
        .runtime
        .state_machine
        .cancel(CancelReservation::new(reservation_id, reason))
        .await?;
    Ok(Json(ReservationResponse::from(&reservation)))
}

/// POST /reservations/{id}/retry-payment
#[tracing::instrument(skip(state))]
pub async fn retry_payment<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    let reservation = state
        .runtime
        .state_machine
        .retry_payment(reservation_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ReservationResponse::from(&reservation))))
}

pub(crate) fn parse_reservation_id(id: &str) -> Result<ReservationId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(ReservationId::from(uuid))
}

pub(crate) fn parse_wallet(field: &str, raw: &str) -> Result<WalletAddress, ApiError> {
    WalletAddress::parse(raw).map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}

//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ReservationError};
use ledger_gateway::{FailureCategory, GatewayError};
use ledger_store::StoreError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Saga execution error.
    Saga(SagaError),
    /// Ledger gateway error outside the saga, e.g. a balance lookup.
    Gateway(GatewayError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Gateway(err) => gateway_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "internal server error");
        } else if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %message, "service unavailable");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::Reservation(reservation_err) => match reservation_err {
            ReservationError::InvalidTransition { .. }
            | ReservationError::AlreadyCreated
            | ReservationError::SettlementConflict => StatusCode::CONFLICT,
            ReservationError::InvalidDates(_)
            | ReservationError::InvalidAmount(_)
            | ReservationError::CheckInTooEarly { .. }
            | ReservationError::CheckOutTooEarly { .. } => StatusCode::BAD_REQUEST,
        },
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Contention(_) => StatusCode::CONFLICT,
        DomainError::Store(store_err) => store_status(store_err),
        DomainError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    if let SagaError::Domain(inner) = err {
        return domain_error_to_response(inner);
    }
    let status = match &err {
        SagaError::ReservationNotFound(_) | SagaError::UnknownTransaction(_) => {
            StatusCode::NOT_FOUND
        }
        SagaError::InvalidTransition { .. }
        | SagaError::PaymentNotConfirmed(_)
        | SagaError::SettlementConflict(_)
        | SagaError::BookingNotLinked(_) => StatusCode::CONFLICT,
        SagaError::FeeWalletDepleted(_) => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::Store(store_err) => store_status(store_err),
        SagaError::Gateway(gateway_err) => gateway_status(gateway_err),
        SagaError::Remote(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn gateway_error_to_response(err: GatewayError) -> (StatusCode, String) {
    (gateway_status(&err), err.to_string())
}

fn gateway_status(err: &GatewayError) -> StatusCode {
    match (err, err.category()) {
        (GatewayError::InvalidAddress(_), _) => StatusCode::BAD_REQUEST,
        (_, FailureCategory::Transient) | (_, FailureCategory::TerminalOperational) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        (_, FailureCategory::TerminalRequest) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::ConcurrencyConflict { .. } | StoreError::LinkConflict { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Gateway(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Saga(SagaError::Store(err))
    }
}

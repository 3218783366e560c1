use aero_catalog::CatalogError;
use aero_order::{PaymentError, ReservationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    PaymentRequired(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    InternalServerError(String),
    #[error(transparent)]
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
            AppError::Unavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::BadGateway(msg) => {
                tracing::error!("Upstream failure: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        let msg = err.to_string();
        match err {
            ReservationError::NotFound(_) => AppError::NotFound(msg),
            ReservationError::AlreadyTerminal { .. }
            | ReservationError::NotYetDue { .. }
            | ReservationError::InsufficientCapacity { .. }
            | ReservationError::PaymentInProgress(_)
            | ReservationError::DuplicatePassenger { .. }
            | ReservationError::NotConfirmed { .. } => AppError::Conflict(msg),
            ReservationError::FlightNotBookable { .. } => AppError::Unprocessable(msg),
            ReservationError::LedgerHalted(_) => AppError::Unavailable(msg),
            ReservationError::InvalidTtl | ReservationError::Invalid(_) => AppError::Validation(msg),
            // Unknown token: internal bug
            ReservationError::UnknownHold(_) => AppError::InternalServerError(msg),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let msg = err.to_string();
        match err {
            CatalogError::NotFound(_) => AppError::NotFound(msg),
            CatalogError::DuplicateCode(_) | CatalogError::CapacityLocked(_) => AppError::Conflict(msg),
            CatalogError::NotBookable { .. } => AppError::Unprocessable(msg),
            CatalogError::Invalid(_) => AppError::Validation(msg),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let msg = err.to_string();
        match err {
            PaymentError::Reservation(e) => e.into(),
            PaymentError::Declined(_) => AppError::PaymentRequired(msg),
            PaymentError::Gateway(_) => AppError::BadGateway(msg),
            PaymentError::Pending(_) => AppError::Conflict(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

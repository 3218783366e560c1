use std::time::Duration;

use aero_core::payment::PaymentStatus;
use aero_order::{Passenger, PaymentError, Reservation, ReservationError, Ticket};
use aero_shared::ReservationEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/holds", post(create_hold))
        .route("/v1/holds/{id}", get(get_hold))
        .route("/v1/holds/{id}/confirm", post(confirm_hold))
        .route("/v1/holds/{id}/cancel", post(cancel_hold))
        .route("/v1/holds/{id}/pay", post(pay_hold))
        .route("/v1/holds/{id}/ticket", post(issue_ticket))
}

#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    pub flight_id: Uuid,
    pub seats: u32,
    pub passenger: Passenger,
    /// Falls back to the configured default; capped at the configured maximum
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HoldResponse {
    pub reservation_id: Uuid,
    pub code: String,
    pub flight_id: Uuid,
    pub seats: u32,
    pub price: i64,
    pub currency: String,
    pub passenger: Passenger,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub expiry_deadline: DateTime<Utc>,
    pub ticket: Option<Ticket>,
}

impl From<Reservation> for HoldResponse {
    fn from(r: Reservation) -> Self {
        Self {
            reservation_id: r.id,
            code: r.code,
            flight_id: r.flight_id,
            seats: r.seats,
            price: r.price,
            currency: r.currency,
            passenger: r.passenger,
            state: r.state.as_str().to_string(),
            created_at: r.created_at,
            expiry_deadline: r.expiry_deadline,
            ticket: r.ticket,
        }
    }
}

impl From<ReservationEvent> for HoldResponse {
    fn from(e: ReservationEvent) -> Self {
        let ticket = match (e.ticket_code, e.ticket_issued_at) {
            (Some(code), Some(issued_at)) => Some(Ticket { code, issued_at }),
            _ => None,
        };
        Self {
            reservation_id: e.reservation_id,
            code: e.code,
            flight_id: e.flight_id,
            seats: e.seats,
            price: e.price,
            currency: e.currency,
            passenger: Passenger::new(e.passenger_name, e.passenger_document),
            state: e.state,
            created_at: e.created_at,
            expiry_deadline: e.expiry_deadline,
            ticket,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PayRequest {
    #[serde(default)]
    pub payment_reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub hold: HoldResponse,
}

/// POST /v1/holds
async fn create_hold(
    State(state): State<AppState>,
    Json(req): Json<CreateHoldRequest>,
) -> Result<(StatusCode, Json<HoldResponse>), AppError> {
    let ttl = req
        .ttl_seconds
        .map(Duration::from_secs)
        .unwrap_or(state.manager.policy().default_ttl);

    let reservation = state
        .manager
        .create_reservation(&req.flight_id, req.seats, ttl, req.passenger)?;
    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// GET /v1/holds/{id}
/// Reservations from before the last restart are served from the store.
async fn get_hold(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<HoldResponse>, AppError> {
    match state.manager.get(&reservation_id) {
        Ok(reservation) => Ok(Json(reservation.into())),
        Err(ReservationError::NotFound(_)) => {
            let row = state
                .reservation_repo
                .find_reservation(reservation_id)
                .await
                .map_err(|e| AppError::InternalServerError(e.to_string()))?
                .ok_or_else(|| AppError::NotFound(format!("Reservation not found: {}", reservation_id)))?;
            Ok(Json(row.into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /v1/holds/{id}/confirm
/// For callers that settled payment elsewhere
async fn confirm_hold(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<HoldResponse>, AppError> {
    Ok(Json(state.manager.confirm(&reservation_id)?.into()))
}

/// POST /v1/holds/{id}/cancel
async fn cancel_hold(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<HoldResponse>, AppError> {
    Ok(Json(state.manager.cancel(&reservation_id)?.into()))
}

/// POST /v1/holds/{id}/pay
/// Charge the locked price, then confirm. A declined charge leaves the hold in place.
/// The body is optional.
async fn pay_hold(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    body: Option<Json<PayRequest>>,
) -> Result<Response, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let result = state
        .payments
        .pay_and_confirm(&reservation_id, req.payment_reference.as_deref())
        .await;

    match result {
        Ok((reservation, intent)) => Ok(Json(PaymentResponse {
            payment_id: intent.id,
            amount: intent.amount,
            currency: intent.currency,
            status: intent.status,
            hold: reservation.into(),
        })
        .into_response()),
        Err(PaymentError::Pending(payment_id)) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "payment_id": payment_id,
                "status": "PROCESSING",
                "reservation_id": reservation_id,
            })),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub ticket_code: String,
    pub issued_at: DateTime<Utc>,
    pub hold: HoldResponse,
}

/// POST /v1/holds/{id}/ticket
/// Issue the e-ticket of a confirmed reservation; repeated calls return the same ticket.
async fn issue_ticket(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<TicketResponse>, AppError> {
    let (reservation, ticket) = state.manager.issue_ticket(&reservation_id)?;
    Ok(Json(TicketResponse {
        ticket_code: ticket.code,
        issued_at: ticket.issued_at,
        hold: reservation.into(),
    }))
}

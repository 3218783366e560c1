use std::convert::Infallible;

use aero_catalog::{Flight, InventorySnapshot};
use aero_core::search::{FlightOption, SearchCriteria, SearchPage, PAGE_SIZE};
use aero_core::{FlightRecord, FlightStatus};
use aero_order::Reservation;
use chrono::Utc;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/flights", get(search_flights).post(upsert_flight))
        .route("/v1/flights/{id}", get(get_flight))
        .route("/v1/flights/{id}/status", post(update_status))
        .route("/v1/flights/{id}/availability", get(get_availability))
        .route("/v1/flights/{id}/holds", get(list_holds))
        .route("/v1/flights/{id}/stream", get(availability_stream))
}

/// GET /v1/flights?origin=&destination=&date=&min_seats=&page=
/// Only flights that have not departed yet, ten per page.
async fn search_flights(
    State(state): State<AppState>,
    Query(mut criteria): Query<SearchCriteria>,
) -> Json<SearchPage<FlightOption>> {
    let min_seats = criteria.min_seats.unwrap_or(0);
    criteria.departs_after = Some(Utc::now());

    let options = state
        .manager
        .catalog()
        .search(&criteria)
        .into_iter()
        .filter_map(|flight| {
            // Flights whose ledger is unavailable are left out of results
            let snap = state.manager.availability(&flight.id).ok()?;
            Some(option(flight, &snap))
        })
        .filter(|opt| opt.available_seats >= min_seats)
        .collect();

    Json(SearchPage::paginate(options, criteria.page, PAGE_SIZE))
}

/// POST /v1/flights
/// Ingest one catalog-feed record
async fn upsert_flight(
    State(state): State<AppState>,
    Json(record): Json<FlightRecord>,
) -> Result<Json<Flight>, AppError> {
    let flight = state.manager.catalog().upsert(record)?;
    persist(&state, &flight).await;
    Ok(Json(flight))
}

async fn get_flight(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
) -> Result<Json<Flight>, AppError> {
    Ok(Json(state.manager.catalog().get(&flight_id)?))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: FlightStatus,
}

/// POST /v1/flights/{id}/status
/// Outstanding holds are untouched; new holds follow the new status.
async fn update_status(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Flight>, AppError> {
    let flight = state.manager.catalog().set_status(&flight_id, req.status)?;
    persist(&state, &flight).await;
    Ok(Json(flight))
}

/// GET /v1/flights/{id}/availability
async fn get_availability(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
) -> Result<Json<InventorySnapshot>, AppError> {
    Ok(Json(state.manager.availability(&flight_id)?))
}

async fn list_holds(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
) -> Result<Json<Vec<Reservation>>, AppError> {
    state.manager.catalog().get(&flight_id)?;
    Ok(Json(state.manager.list_for_flight(&flight_id)))
}

/// GET /v1/flights/{id}/stream
/// Server-sent availability changes for one flight
async fn availability_stream(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.manager.catalog().get(&flight_id)?;
    let rx = state.manager.subscribe_availability();

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        // Lagged receivers skip ahead; the next snapshot is complete
        let event = match result {
            Ok(event) if event.flight_id == flight_id => event,
            _ => return None,
        };
        match Event::default().event("availability").json_data(&event) {
            Ok(sse) => Some(Ok::<_, Infallible>(sse)),
            Err(e) => {
                error!("Failed to encode availability event: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn option(flight: Flight, snap: &InventorySnapshot) -> FlightOption {
    FlightOption {
        flight_id: flight.id,
        code: flight.code,
        origin: flight.origin,
        destination: flight.destination,
        departure_time: flight.departure,
        arrival_time: flight.arrival,
        status: flight.status,
        price_amount: flight.base_price,
        price_currency: flight.currency,
        available_seats: snap.available_seats,
        total_seats: snap.total_seats,
    }
}

/// The catalog already holds the update; a failed write is only logged.
async fn persist(state: &AppState, flight: &Flight) {
    match state.flight_repo.save_flight(&flight.to_record()).await {
        Ok(()) => info!("Flight {} saved", flight.code),
        Err(e) => error!("Failed to persist flight {}: {}", flight.code, e),
    }
}

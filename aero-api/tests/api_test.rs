use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aero_api::{app, AppState, BootstrapReport};
use aero_catalog::{FlightCatalog, InventoryLedger};
use aero_core::repository::{FlightRepository, ReservationRepository};
use aero_core::{FlightRecord, FlightStatus};
use aero_order::{HoldPolicy, MockPaymentAdapter, ReservationManager};
use aero_shared::{AvailabilityChangedEvent, ReservationEvent};
use aero_store::{InMemoryFlightRepository, InMemoryReservationRepository};
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

/// A month from now, so the flight is always listed by search
fn departure_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(30)
}

fn flight_on(code: &str, date: NaiveDate, seats: u32) -> FlightRecord {
    FlightRecord {
        flight_id: Uuid::new_v4(),
        code: code.to_string(),
        origin: "Madrid".to_string(),
        destination: "Barcelona".to_string(),
        date,
        time: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
        arrival: None,
        base_price: 8900,
        currency: "EUR".to_string(),
        total_seats: seats,
        status: FlightStatus::Scheduled,
    }
}

fn flight(seats: u32) -> FlightRecord {
    flight_on("IB3102", departure_date(), seats)
}

struct TestApp {
    router: Router,
    flight_id: Uuid,
    flight_repo: Arc<InMemoryFlightRepository>,
}

async fn spawn_app_with_flights(
    records: Vec<FlightRecord>,
    reservation_repo: Arc<InMemoryReservationRepository>,
) -> TestApp {
    let flight_id = records[0].flight_id;
    let flight_repo = Arc::new(InMemoryFlightRepository::with_flights(records));

    let catalog = Arc::new(FlightCatalog::new());
    let ledger = Arc::new(InventoryLedger::new(catalog.clone()));
    let manager = Arc::new(ReservationManager::new(catalog, ledger, HoldPolicy::default()));

    let state = AppState::new(manager, Arc::new(MockPaymentAdapter), flight_repo.clone(), reservation_repo);
    state.bootstrap().await.unwrap();

    TestApp {
        router: app(state),
        flight_id,
        flight_repo,
    }
}

async fn spawn_app_with(seats: u32, reservation_repo: Arc<InMemoryReservationRepository>) -> TestApp {
    spawn_app_with_flights(vec![flight(seats)], reservation_repo).await
}

async fn spawn_app(seats: u32) -> TestApp {
    spawn_app_with(seats, Arc::new(InMemoryReservationRepository::new())).await
}

async fn read(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();
    read(app, request).await
}

/// Bare POST, no body and no content type
async fn post_empty(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap();
    read(app, request).await
}

fn passenger() -> Value {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    json!({
        "name": "Ana Garcia",
        "document": format!("P{:07}", NEXT.fetch_add(1, Ordering::Relaxed)),
    })
}

async fn create_hold(app: &TestApp, seats: u32) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/v1/holds",
        Some(json!({ "flight_id": app.flight_id, "seats": seats, "passenger": passenger() })),
    )
    .await
}

async fn availability(app: &TestApp) -> Value {
    let (status, body) = send(app, "GET", &format!("/v1/flights/{}/availability", app.flight_id), None).await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_hold_confirm_flow() {
    let app = spawn_app(10).await;

    let (status, hold) = create_hold(&app, 2).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hold["state"], "HELD");
    assert_eq!(hold["price"], 17800);
    assert_eq!(hold["currency"], "EUR");
    assert_eq!(hold["code"].as_str().unwrap().len(), 8);

    let inv = availability(&app).await;
    assert_eq!(inv["held_seats"], 2);
    assert_eq!(inv["available_seats"], 8);

    let id = hold["reservation_id"].as_str().unwrap().to_string();
    let (status, confirmed) = send(&app, "POST", &format!("/v1/holds/{}/confirm", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["state"], "CONFIRMED");

    let inv = availability(&app).await;
    assert_eq!(inv["committed_seats"], 2);
    assert_eq!(inv["held_seats"], 0);

    // Terminal reservations never change again
    let (status, body) = send(&app, "POST", &format!("/v1/holds/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already"));

    let (status, fetched) = send(&app, "GET", &format!("/v1/holds/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["state"], "CONFIRMED");
}

#[tokio::test]
async fn test_cancel_returns_seats() {
    let app = spawn_app(10).await;
    let (_, hold) = create_hold(&app, 4).await;
    let id = hold["reservation_id"].as_str().unwrap().to_string();

    let (status, cancelled) = send(&app, "POST", &format!("/v1/holds/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["state"], "CANCELLED");
    assert_eq!(availability(&app).await["available_seats"], 10);
}

#[tokio::test]
async fn test_hold_rejections() {
    let app = spawn_app(3).await;

    let (status, body) = create_hold(&app, 4).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("Insufficient capacity"));

    let (status, _) = create_hold(&app, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/v1/holds",
        Some(json!({ "flight_id": Uuid::new_v4(), "seats": 1, "passenger": passenger() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/v1/holds/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nothing was held by the failed attempts
    assert_eq!(availability(&app).await["available_seats"], 3);
}

#[tokio::test]
async fn test_departed_flight_is_not_bookable() {
    let app = spawn_app(10).await;

    let (status, flight) = send(
        &app,
        "POST",
        &format!("/v1/flights/{}/status", app.flight_id),
        Some(json!({ "status": "DEPARTED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flight["status"], "DEPARTED");

    let (status, _) = create_hold(&app, 1).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let saved = app.flight_repo.load_flights().await.unwrap();
    assert_eq!(saved[0].status, FlightStatus::Departed);
}

#[tokio::test]
async fn test_pay_flow() {
    let app = spawn_app(10).await;

    let (_, hold) = create_hold(&app, 2).await;
    let id = hold["reservation_id"].as_str().unwrap().to_string();
    let pay = format!("/v1/holds/{}/pay", id);

    let (status, _) = send(&app, "POST", &pay, Some(json!({ "payment_reference": "decline" }))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    let (_, fetched) = send(&app, "GET", &format!("/v1/holds/{}", id), None).await;
    assert_eq!(fetched["state"], "HELD");

    let (status, paid) = send(&app, "POST", &pay, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "SUCCEEDED");
    assert_eq!(paid["amount"], 17800);
    assert_eq!(paid["hold"]["state"], "CONFIRMED");
    assert_eq!(availability(&app).await["committed_seats"], 2);

    let (status, _) = send(&app, "POST", &pay, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_pay_without_body() {
    let app = spawn_app(10).await;
    let (_, hold) = create_hold(&app, 1).await;
    let id = hold["reservation_id"].as_str().unwrap();

    let (status, paid) = post_empty(&app, &format!("/v1/holds/{}/pay", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "SUCCEEDED");
    assert_eq!(paid["hold"]["state"], "CONFIRMED");
}

#[tokio::test]
async fn test_processing_payment_is_not_charged_twice() {
    let app = spawn_app(10).await;
    let (_, hold) = create_hold(&app, 2).await;
    let id = hold["reservation_id"].as_str().unwrap().to_string();
    let pay = format!("/v1/holds/{}/pay", id);

    let (status, body) = send(&app, "POST", &pay, Some(json!({ "payment_reference": "pending" }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PROCESSING");

    let (status, body) = send(&app, "POST", &pay, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("in progress"));

    // Settled out of band
    let (status, confirmed) = post_empty(&app, &format!("/v1/holds/{}/confirm", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["state"], "CONFIRMED");
    assert_eq!(availability(&app).await["committed_seats"], 2);
}

#[tokio::test]
async fn test_one_active_hold_per_passenger() {
    let app = spawn_app(10).await;
    let traveller = passenger();
    let request = json!({ "flight_id": app.flight_id, "seats": 1, "passenger": traveller.clone() });

    let (status, hold) = send(&app, "POST", "/v1/holds", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hold["passenger"]["document"], traveller["document"]);

    let (status, body) = send(&app, "POST", "/v1/holds", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains(traveller["document"].as_str().unwrap()));

    let id = hold["reservation_id"].as_str().unwrap();
    post_empty(&app, &format!("/v1/holds/{}/cancel", id)).await;
    let (status, _) = send(&app, "POST", "/v1/holds", Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "POST",
        "/v1/holds",
        Some(json!({ "flight_id": app.flight_id, "seats": 1, "passenger": { "name": "", "document": "X1" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/v1/holds", Some(json!({ "flight_id": app.flight_id, "seats": 1 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_ticket_issued_after_confirmation() {
    let app = spawn_app(10).await;
    let (_, hold) = create_hold(&app, 1).await;
    let id = hold["reservation_id"].as_str().unwrap().to_string();
    let ticket = format!("/v1/holds/{}/ticket", id);

    let (status, _) = post_empty(&app, &ticket).await;
    assert_eq!(status, StatusCode::CONFLICT);

    post_empty(&app, &format!("/v1/holds/{}/confirm", id)).await;
    let (status, first) = post_empty(&app, &ticket).await;
    assert_eq!(status, StatusCode::OK);
    let code = first["ticket_code"].as_str().unwrap().to_string();
    assert!(code.starts_with("TK"));
    assert!(code.ends_with(hold["code"].as_str().unwrap()));
    assert_eq!(first["hold"]["ticket"]["code"], code.as_str());

    let (status, again) = post_empty(&app, &ticket).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["ticket_code"], code.as_str());
    assert_eq!(again["issued_at"], first["issued_at"]);

    let (_, fetched) = send(&app, "GET", &format!("/v1/holds/{}", id), None).await;
    assert_eq!(fetched["ticket"]["code"], code.as_str());

    let (status, _) = post_empty(&app, &format!("/v1/holds/{}/ticket", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_payment_breaker_opens_after_gateway_failures() {
    let app = spawn_app(10).await;
    let (_, hold) = create_hold(&app, 1).await;
    let pay = format!("/v1/holds/{}/pay", hold["reservation_id"].as_str().unwrap());
    let failing = json!({ "payment_reference": "fail-gateway" });

    for _ in 0..5 {
        let (status, _) = send(&app, "POST", &pay, Some(failing.clone())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    let (status, body) = send(&app, "POST", &pay, Some(json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("OPEN"));

    // Other routes are not guarded
    let (status, _) = create_hold(&app, 1).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_search_reports_live_availability() {
    let app = spawn_app(10).await;
    create_hold(&app, 3).await;

    let uri = format!("/v1/flights?origin=mad&date={}", departure_date());
    let (status, page) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["page"], 1);
    assert_eq!(page["total_results"], 1);
    let results = page["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["code"], "IB3102");
    assert_eq!(results[0]["available_seats"], 7);
    assert_eq!(results[0]["price_amount"], 8900);

    let (_, page) = send(&app, "GET", "/v1/flights?min_seats=8", None).await;
    assert!(page["results"].as_array().unwrap().is_empty());

    let (_, page) = send(&app, "GET", "/v1/flights?destination=valencia", None).await;
    assert!(page["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_pages_upcoming_flights() {
    let date = departure_date();
    let mut records: Vec<FlightRecord> = (0..12).map(|n| flight_on(&format!("IB31{:02}", n), date, 50)).collect();
    let yesterday = Utc::now().date_naive() - Duration::days(1);
    records.push(flight_on("IB2000", yesterday, 50));
    let app = spawn_app_with_flights(records, Arc::new(InMemoryReservationRepository::new())).await;

    let (status, first) = send(&app, "GET", "/v1/flights", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["total_results"], 12);
    assert_eq!(first["total_pages"], 2);
    assert_eq!(first["results"].as_array().unwrap().len(), 10);
    assert_eq!(first["results"][0]["code"], "IB3100");

    let (_, second) = send(&app, "GET", "/v1/flights?page=2", None).await;
    assert_eq!(second["page"], 2);
    let codes: Vec<&str> = second["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["IB3110", "IB3111"]);

    // Past the last page
    let (_, clamped) = send(&app, "GET", "/v1/flights?page=7", None).await;
    assert_eq!(clamped["page"], 2);

    // Departed flights are never listed, even when asked for by date
    let (_, past) = send(&app, "GET", &format!("/v1/flights?date={}", yesterday), None).await;
    assert_eq!(past["total_results"], 0);
}

#[tokio::test]
async fn test_upsert_flight() {
    let app = spawn_app(10).await;
    let flight_id = Uuid::new_v4();
    let record = json!({
        "flight_id": flight_id,
        "code": "VY1001",
        "origin": "Barcelona",
        "destination": "Valencia",
        "date": "2031-03-20",
        "time": "10:00:00",
        "base_price": 6500,
        "total_seats": 150
    });

    let (status, created) = send(&app, "POST", "/v1/flights", Some(record.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["code"], "VY1001");
    assert_eq!(created["currency"], "EUR");
    assert_eq!(app.flight_repo.load_flights().await.unwrap().len(), 2);

    let (status, _) = send(&app, "GET", &format!("/v1/flights/{}", flight_id), None).await;
    assert_eq!(status, StatusCode::OK);

    // Capacity is frozen once a hold exists
    let (status, _) = send(
        &app,
        "POST",
        "/v1/holds",
        Some(json!({ "flight_id": flight_id, "seats": 1, "passenger": passenger() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let mut revised = record;
    revised["total_seats"] = json!(200);
    let (status, _) = send(&app, "POST", "/v1/flights", Some(revised)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut invalid = json!({
        "flight_id": Uuid::new_v4(),
        "code": "XX0001",
        "origin": "Madrid",
        "destination": "Madrid",
        "date": "2031-03-20",
        "time": "10:00:00",
        "base_price": 100,
        "total_seats": 10
    });
    let (status, _) = send(&app, "POST", "/v1/flights", Some(invalid.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    invalid["destination"] = json!("Sevilla");
    invalid["code"] = json!("IB3102");
    let (status, _) = send(&app, "POST", "/v1/flights", Some(invalid)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_holds_for_flight() {
    let app = spawn_app(10).await;
    create_hold(&app, 1).await;
    create_hold(&app, 2).await;

    let (status, holds) = send(&app, "GET", &format!("/v1/flights/{}/holds", app.flight_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let holds = holds.as_array().unwrap();
    assert_eq!(holds.len(), 2);
    assert_eq!(holds[0]["seats"], 1);
    assert_eq!(holds[1]["seats"], 2);
}

fn stored_reservation(flight_id: Uuid, document: &str, seats: u32, state: &str) -> ReservationEvent {
    let now = Utc::now();
    ReservationEvent {
        reservation_id: Uuid::new_v4(),
        code: "ABCD1234".to_string(),
        flight_id,
        seats,
        price: 8900 * seats as i64,
        currency: "EUR".to_string(),
        passenger_name: "Ana Garcia".to_string(),
        passenger_document: document.to_string(),
        state: state.to_string(),
        created_at: now,
        expiry_deadline: now + Duration::minutes(15),
        ticket_code: None,
        ticket_issued_at: None,
        timestamp: now.timestamp(),
    }
}

fn stored_inventory(flight_id: Uuid, committed: u32, held: u32, version: u64) -> AvailabilityChangedEvent {
    AvailabilityChangedEvent {
        flight_id,
        total_seats: 10,
        committed_seats: committed,
        held_seats: held,
        available_seats: 10 - committed - held,
        version,
        timestamp: Utc::now().timestamp(),
    }
}

async fn restart(record: FlightRecord, repo: Arc<InMemoryReservationRepository>) -> (TestApp, BootstrapReport) {
    let flight_id = record.flight_id;
    let flight_repo = Arc::new(InMemoryFlightRepository::with_flights(vec![record]));
    let catalog = Arc::new(FlightCatalog::new());
    let ledger = Arc::new(InventoryLedger::new(catalog.clone()));
    let manager = Arc::new(ReservationManager::new(catalog, ledger, HoldPolicy::default()));
    let state = AppState::new(manager, Arc::new(MockPaymentAdapter), flight_repo.clone(), repo);

    let report = state.bootstrap().await.unwrap();
    let app = TestApp {
        router: app(state),
        flight_id,
        flight_repo,
    };
    (app, report)
}

#[tokio::test]
async fn test_bootstrap_restores_committed_seats_and_expires_stale_holds() {
    let repo = Arc::new(InMemoryReservationRepository::new());
    let record = flight(10);
    let flight_id = record.flight_id;

    // State left behind by a previous process
    repo.save_inventory(&stored_inventory(flight_id, 4, 2, 7)).await.unwrap();
    let confirmed = stored_reservation(flight_id, "X1234567", 4, "CONFIRMED");
    repo.save_reservation(&confirmed).await.unwrap();
    let stale = stored_reservation(flight_id, "Y7654321", 2, "HELD");
    repo.save_reservation(&stale).await.unwrap();

    let (app, report) = restart(record, repo).await;
    assert_eq!(report.flights, 1);
    assert_eq!(report.inventories, 1);
    assert_eq!(report.stale_holds, 1);

    let inv = availability(&app).await;
    assert_eq!(inv["committed_seats"], 4);
    assert_eq!(inv["held_seats"], 0);
    assert_eq!(inv["available_seats"], 6);
    assert_eq!(inv["version"], 7);

    let (status, fetched) = send(&app, "GET", &format!("/v1/holds/{}", stale.reservation_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["state"], "EXPIRED");

    // The confirmed passenger keeps their seat, the expired one may book again
    let rebook = |document: &str| {
        json!({
            "flight_id": flight_id,
            "seats": 1,
            "passenger": { "name": "Ana Garcia", "document": document },
        })
    };
    let (status, _) = send(&app, "POST", "/v1/holds", Some(rebook("X1234567"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&app, "POST", "/v1/holds", Some(rebook("Y7654321"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(availability(&app).await["version"], 8);
}

#[tokio::test]
async fn test_bootstrap_trusts_confirmed_rows_over_a_stale_inventory() {
    let repo = Arc::new(InMemoryReservationRepository::new());
    let record = flight(10);
    let flight_id = record.flight_id;

    // The snapshot of the last confirmation never reached the store
    repo.save_inventory(&stored_inventory(flight_id, 2, 0, 3)).await.unwrap();
    for (document, seats) in [("X1234567", 2), ("Y7654321", 3)] {
        repo.save_reservation(&stored_reservation(flight_id, document, seats, "CONFIRMED"))
            .await
            .unwrap();
    }
    repo.save_reservation(&stored_reservation(flight_id, "Z0000001", 4, "CANCELLED"))
        .await
        .unwrap();

    let (app, report) = restart(record, repo).await;
    assert_eq!(report.inventories, 1);

    let inv = availability(&app).await;
    assert_eq!(inv["committed_seats"], 5);
    assert_eq!(inv["available_seats"], 5);
}

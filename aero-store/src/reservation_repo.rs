use aero_core::repository::{RepoResult, ReservationRepository};
use aero_shared::{AvailabilityChangedEvent, ReservationEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PostgresReservationRepository {
    pool: PgPool,
}

impl PostgresReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    code: String,
    flight_id: Uuid,
    seats: i32,
    price: i64,
    currency: String,
    passenger_name: String,
    passenger_document: String,
    state: String,
    created_at: DateTime<Utc>,
    expiry_deadline: DateTime<Utc>,
    ticket_code: Option<String>,
    ticket_issued_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for ReservationEvent {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(ReservationEvent {
            reservation_id: row.id,
            code: row.code,
            flight_id: row.flight_id,
            seats: u32::try_from(row.seats)?,
            price: row.price,
            currency: row.currency,
            passenger_name: row.passenger_name,
            passenger_document: row.passenger_document,
            state: row.state,
            created_at: row.created_at,
            expiry_deadline: row.expiry_deadline,
            ticket_code: row.ticket_code,
            ticket_issued_at: row.ticket_issued_at,
            timestamp: row.updated_at.timestamp(),
        })
    }
}

const SELECT_RESERVATION: &str = r#"
    SELECT id, code, flight_id, seats, price, currency, passenger_name, passenger_document, state,
           created_at, expiry_deadline, ticket_code, ticket_issued_at, updated_at
    FROM reservations
"#;

#[async_trait]
impl ReservationRepository for PostgresReservationRepository {
    async fn save_reservation(&self, snapshot: &ReservationEvent) -> RepoResult<()> {
        let updated_at = DateTime::<Utc>::from_timestamp(snapshot.timestamp, 0).unwrap_or_else(Utc::now);

        // Terminal rows are history: only a HELD row may change state, and a
        // CONFIRMED row only gains its ticket
        sqlx::query(
            r#"
            INSERT INTO reservations (id, code, flight_id, seats, price, currency,
                                      passenger_name, passenger_document, state,
                                      created_at, expiry_deadline, ticket_code, ticket_issued_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                ticket_code = COALESCE(reservations.ticket_code, EXCLUDED.ticket_code),
                ticket_issued_at = COALESCE(reservations.ticket_issued_at, EXCLUDED.ticket_issued_at),
                updated_at = EXCLUDED.updated_at
            WHERE reservations.state = 'HELD'
               OR (reservations.state = 'CONFIRMED' AND EXCLUDED.state = 'CONFIRMED')
            "#,
        )
        .bind(snapshot.reservation_id)
        .bind(&snapshot.code)
        .bind(snapshot.flight_id)
        .bind(i32::try_from(snapshot.seats)?)
        .bind(snapshot.price)
        .bind(&snapshot.currency)
        .bind(&snapshot.passenger_name)
        .bind(&snapshot.passenger_document)
        .bind(&snapshot.state)
        .bind(snapshot.created_at)
        .bind(snapshot.expiry_deadline)
        .bind(&snapshot.ticket_code)
        .bind(snapshot.ticket_issued_at)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_reservation(&self, id: Uuid) -> RepoResult<Option<ReservationEvent>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!("{} WHERE id = $1", SELECT_RESERVATION))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ReservationEvent::try_from).transpose()
    }

    async fn list_reservations(&self, flight_id: Uuid) -> RepoResult<Vec<ReservationEvent>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "{} WHERE flight_id = $1 ORDER BY created_at",
            SELECT_RESERVATION
        ))
        .bind(flight_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReservationEvent::try_from).collect()
    }

    async fn list_held(&self) -> RepoResult<Vec<ReservationEvent>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "{} WHERE state = 'HELD' ORDER BY created_at",
            SELECT_RESERVATION
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReservationEvent::try_from).collect()
    }

    async fn save_inventory(&self, snapshot: &AvailabilityChangedEvent) -> RepoResult<()> {
        // Snapshots may arrive out of order; only a newer version replaces the row
        sqlx::query(
            r#"
            INSERT INTO inventory (flight_id, total_seats, committed_seats, held_seats, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (flight_id) DO UPDATE SET
                total_seats = EXCLUDED.total_seats,
                committed_seats = EXCLUDED.committed_seats,
                held_seats = EXCLUDED.held_seats,
                version = EXCLUDED.version,
                updated_at = NOW()
            WHERE inventory.version < EXCLUDED.version
            "#,
        )
        .bind(snapshot.flight_id)
        .bind(i32::try_from(snapshot.total_seats)?)
        .bind(i32::try_from(snapshot.committed_seats)?)
        .bind(i32::try_from(snapshot.held_seats)?)
        .bind(i64::try_from(snapshot.version)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_inventory(&self) -> RepoResult<Vec<AvailabilityChangedEvent>> {
        let rows: Vec<(Uuid, i32, i32, i32, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT flight_id, total_seats, committed_seats, held_seats, version, updated_at FROM inventory",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(flight_id, total, committed, held, version, updated_at)| -> RepoResult<AvailabilityChangedEvent> {
                let total_seats = u32::try_from(total)?;
                let committed_seats = u32::try_from(committed)?;
                let held_seats = u32::try_from(held)?;
                Ok(AvailabilityChangedEvent {
                    flight_id,
                    total_seats,
                    committed_seats,
                    held_seats,
                    available_seats: total_seats.saturating_sub(committed_seats + held_seats),
                    version: u64::try_from(version)?,
                    timestamp: updated_at.timestamp(),
                })
            })
            .collect()
    }
}

use aero_core::repository::{FlightRepository, RepoResult};
use aero_core::{FlightRecord, FlightStatus};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PostgresFlightRepository {
    pool: PgPool,
}

impl PostgresFlightRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    id: Uuid,
    code: String,
    origin: String,
    destination: String,
    departure_date: NaiveDate,
    departure_time: NaiveTime,
    arrival: Option<DateTime<Utc>>,
    base_price: i64,
    currency: String,
    total_seats: i32,
    status: String,
}

impl TryFrom<FlightRow> for FlightRecord {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: FlightRow) -> Result<Self, Self::Error> {
        Ok(FlightRecord {
            flight_id: row.id,
            code: row.code,
            origin: row.origin,
            destination: row.destination,
            date: row.departure_date,
            time: row.departure_time,
            arrival: row.arrival,
            base_price: row.base_price,
            currency: row.currency,
            total_seats: u32::try_from(row.total_seats)?,
            status: FlightStatus::parse(&row.status)?,
        })
    }
}

#[async_trait]
impl FlightRepository for PostgresFlightRepository {
    async fn load_flights(&self) -> RepoResult<Vec<FlightRecord>> {
        let rows = sqlx::query_as::<_, FlightRow>(
            r#"
            SELECT id, code, origin, destination, departure_date, departure_time,
                   arrival, base_price, currency, total_seats, status
            FROM flights
            ORDER BY departure_date, departure_time
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FlightRecord::try_from).collect()
    }

    async fn save_flight(&self, flight: &FlightRecord) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO flights (id, code, origin, destination, departure_date, departure_time,
                                 arrival, base_price, currency, total_seats, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                code = EXCLUDED.code,
                origin = EXCLUDED.origin,
                destination = EXCLUDED.destination,
                departure_date = EXCLUDED.departure_date,
                departure_time = EXCLUDED.departure_time,
                arrival = EXCLUDED.arrival,
                base_price = EXCLUDED.base_price,
                currency = EXCLUDED.currency,
                total_seats = EXCLUDED.total_seats,
                status = EXCLUDED.status
            "#,
        )
        .bind(flight.flight_id)
        .bind(&flight.code)
        .bind(&flight.origin)
        .bind(&flight.destination)
        .bind(flight.date)
        .bind(flight.time)
        .bind(flight.arrival)
        .bind(flight.base_price)
        .bind(&flight.currency)
        .bind(i32::try_from(flight.total_seats)?)
        .bind(flight.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Published after every successful reservation transition.
///
/// Carries a full snapshot of the reservation so consumers (persistence,
/// notifications) never have to call back into the engine.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReservationEvent {
    pub reservation_id: Uuid,
    pub code: String,
    pub flight_id: Uuid,
    pub seats: u32,
    pub price: i64,
    pub currency: String,
    pub passenger_name: String,
    pub passenger_document: String,
    /// HELD, CONFIRMED, CANCELLED or EXPIRED
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub expiry_deadline: DateTime<Utc>,
    #[serde(default)]
    pub ticket_code: Option<String>,
    #[serde(default)]
    pub ticket_issued_at: Option<DateTime<Utc>>,
    pub timestamp: i64,
}

/// Seat counters of one flight right after a ledger mutation.
///
/// `version` grows with every mutation of the flight, so of two snapshots the
/// one with the higher version is the later state regardless of arrival order.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct AvailabilityChangedEvent {
    pub flight_id: Uuid,
    pub total_seats: u32,
    pub committed_seats: u32,
    pub held_seats: u32,
    pub available_seats: u32,
    pub version: u64,
    pub timestamp: i64,
}

impl AvailabilityChangedEvent {
    pub fn supersedes(&self, other: &AvailabilityChangedEvent) -> bool {
        self.version > other.version
    }
}

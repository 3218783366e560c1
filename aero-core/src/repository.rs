use async_trait::async_trait;
use uuid::Uuid;
use aero_shared::{AvailabilityChangedEvent, ReservationEvent};
use crate::feed::FlightRecord;

pub type RepoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Flights table, keyed by flight id
#[async_trait]
pub trait FlightRepository: Send + Sync {
    async fn load_flights(&self) -> RepoResult<Vec<FlightRecord>>;

    async fn save_flight(&self, flight: &FlightRecord) -> RepoResult<()>;
}

/// Reservations and inventory tables.
///
/// Rows are written from transition snapshots; the in-process ledger stays
/// the authority on seat counts.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn save_reservation(&self, snapshot: &ReservationEvent) -> RepoResult<()>;

    async fn find_reservation(&self, id: Uuid) -> RepoResult<Option<ReservationEvent>>;

    async fn list_reservations(&self, flight_id: Uuid) -> RepoResult<Vec<ReservationEvent>>;

    /// Reservations still recorded as HELD
    async fn list_held(&self) -> RepoResult<Vec<ReservationEvent>>;

    async fn save_inventory(&self, snapshot: &AvailabilityChangedEvent) -> RepoResult<()>;

    async fn load_inventory(&self) -> RepoResult<Vec<AvailabilityChangedEvent>>;
}

use std::collections::HashMap;
use std::path::Path;

use aero_core::repository::{FlightRepository, RepoResult, ReservationRepository};
use aero_core::FlightRecord;
use aero_shared::{AvailabilityChangedEvent, ReservationEvent};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Flights kept in process, optionally seeded from a JSON catalog feed.
#[derive(Default)]
pub struct InMemoryFlightRepository {
    flights: RwLock<HashMap<Uuid, FlightRecord>>,
}

impl InMemoryFlightRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flights(records: Vec<FlightRecord>) -> Self {
        Self {
            flights: RwLock::new(records.into_iter().map(|r| (r.flight_id, r)).collect()),
        }
    }

    /// Load a JSON array of feed records
    pub fn from_json_file(path: impl AsRef<Path>) -> RepoResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let records: Vec<FlightRecord> = serde_json::from_str(&raw)?;
        info!("Loaded {} flight(s) from {}", records.len(), path.as_ref().display());
        Ok(Self::with_flights(records))
    }
}

#[async_trait]
impl FlightRepository for InMemoryFlightRepository {
    async fn load_flights(&self) -> RepoResult<Vec<FlightRecord>> {
        let mut flights: Vec<FlightRecord> = self.flights.read().await.values().cloned().collect();
        flights.sort_by_key(|f| f.departure());
        Ok(flights)
    }

    async fn save_flight(&self, flight: &FlightRecord) -> RepoResult<()> {
        self.flights.write().await.insert(flight.flight_id, flight.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryReservationRepository {
    reservations: RwLock<HashMap<Uuid, ReservationEvent>>,
    inventory: RwLock<HashMap<Uuid, AvailabilityChangedEvent>>,
}

impl InMemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn inventory(&self, flight_id: Uuid) -> Option<AvailabilityChangedEvent> {
        self.inventory.read().await.get(&flight_id).cloned()
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn save_reservation(&self, snapshot: &ReservationEvent) -> RepoResult<()> {
        let mut reservations = self.reservations.write().await;
        // Terminal rows are history; a confirmed row only gains its ticket
        match reservations.get_mut(&snapshot.reservation_id) {
            None => {
                reservations.insert(snapshot.reservation_id, snapshot.clone());
            }
            Some(existing) if existing.state == "HELD" => *existing = snapshot.clone(),
            Some(existing) if existing.state == "CONFIRMED" && snapshot.state == "CONFIRMED" => {
                if existing.ticket_code.is_none() {
                    existing.ticket_code = snapshot.ticket_code.clone();
                    existing.ticket_issued_at = snapshot.ticket_issued_at;
                    existing.timestamp = snapshot.timestamp;
                }
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn find_reservation(&self, id: Uuid) -> RepoResult<Option<ReservationEvent>> {
        Ok(self.reservations.read().await.get(&id).cloned())
    }

    async fn list_reservations(&self, flight_id: Uuid) -> RepoResult<Vec<ReservationEvent>> {
        let mut list: Vec<ReservationEvent> = self
            .reservations
            .read()
            .await
            .values()
            .filter(|r| r.flight_id == flight_id)
            .cloned()
            .collect();
        list.sort_by_key(|r| r.created_at);
        Ok(list)
    }

    async fn list_held(&self) -> RepoResult<Vec<ReservationEvent>> {
        Ok(self
            .reservations
            .read()
            .await
            .values()
            .filter(|r| r.state == "HELD")
            .cloned()
            .collect())
    }

    async fn save_inventory(&self, snapshot: &AvailabilityChangedEvent) -> RepoResult<()> {
        let mut inventory = self.inventory.write().await;
        let newer = inventory
            .get(&snapshot.flight_id)
            .map_or(true, |stored| snapshot.supersedes(stored));
        if newer {
            inventory.insert(snapshot.flight_id, snapshot.clone());
        }
        Ok(())
    }

    async fn load_inventory(&self) -> RepoResult<Vec<AvailabilityChangedEvent>> {
        Ok(self.inventory.read().await.values().cloned().collect())
    }
}

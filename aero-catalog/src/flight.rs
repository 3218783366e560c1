use std::collections::HashMap;
use std::sync::RwLock;

use aero_core::search::SearchCriteria;
use aero_core::{CoreError, FlightRecord, FlightStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// A scheduled flight as known to the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flight {
    pub id: Uuid,
    pub code: String,
    pub origin: String,
    pub destination: String,
    pub departure: DateTime<Utc>,
    pub arrival: Option<DateTime<Utc>>,
    pub base_price: i64,
    pub currency: String,
    pub total_seats: u32,
    pub status: FlightStatus,
    /// Set once the ledger has issued a hold against this flight.
    pub capacity_locked: bool,
}

impl Flight {
    fn from_record(record: FlightRecord) -> Self {
        Self {
            id: record.flight_id,
            departure: record.departure(),
            code: record.code,
            origin: record.origin,
            destination: record.destination,
            arrival: record.arrival,
            base_price: record.base_price,
            currency: record.currency,
            total_seats: record.total_seats,
            status: record.status,
            capacity_locked: false,
        }
    }

    pub fn is_bookable(&self) -> bool {
        self.status == FlightStatus::Scheduled
    }

    /// Back to the feed shape, for persistence
    pub fn to_record(&self) -> FlightRecord {
        FlightRecord {
            flight_id: self.id,
            code: self.code.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            date: self.departure.date_naive(),
            time: self.departure.time(),
            arrival: self.arrival,
            base_price: self.base_price,
            currency: self.currency.clone(),
            total_seats: self.total_seats,
            status: self.status,
        }
    }
}

/// Holds schedule facts and capacity for every known flight.
pub struct FlightCatalog {
    flights: RwLock<HashMap<Uuid, Flight>>,
}

impl FlightCatalog {
    pub fn new() -> Self {
        Self {
            flights: RwLock::new(HashMap::new()),
        }
    }

    /// Ingest one catalog feed record.
    ///
    /// Schedule facts, price and status are always taken from the feed. A
    /// capacity revision is refused once holds have been issued.
    pub fn upsert(&self, record: FlightRecord) -> Result<Flight, CatalogError> {
        record.validate()?;

        let mut flights = self.flights.write().unwrap_or_else(|e| e.into_inner());

        if flights.values().any(|f| f.code == record.code && f.id != record.flight_id) {
            return Err(CatalogError::DuplicateCode(record.code));
        }

        let flight = match flights.get_mut(&record.flight_id) {
            Some(existing) => {
                if existing.capacity_locked && existing.total_seats != record.total_seats {
                    return Err(CatalogError::CapacityLocked(existing.id));
                }
                let locked = existing.capacity_locked;
                *existing = Flight::from_record(record);
                existing.capacity_locked = locked;
                info!("Flight {} updated from feed ({})", existing.code, existing.status.as_str());
                existing.clone()
            }
            None => {
                let flight = Flight::from_record(record);
                info!("Flight {} scheduled: {} -> {}", flight.code, flight.origin, flight.destination);
                flights.insert(flight.id, flight.clone());
                flight
            }
        };

        Ok(flight)
    }

    pub fn get(&self, flight_id: &Uuid) -> Result<Flight, CatalogError> {
        self.flights
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(flight_id)
            .cloned()
            .ok_or(CatalogError::NotFound(*flight_id))
    }

    /// All flights ordered by departure
    pub fn list(&self) -> Vec<Flight> {
        let mut flights: Vec<Flight> = self
            .flights
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        flights.sort_by_key(|f| (f.departure, f.code.clone()));
        flights
    }

    /// Bookable flights matching the criteria, ordered by departure
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<Flight> {
        self.list()
            .into_iter()
            .filter(|f| f.is_bookable() && criteria.matches(&f.origin, &f.destination, f.departure))
            .collect()
    }

    /// Fails with `NotBookable` unless the flight is still `Scheduled`.
    pub fn ensure_bookable(&self, flight_id: &Uuid) -> Result<Flight, CatalogError> {
        let flight = self.get(flight_id)?;
        if !flight.is_bookable() {
            return Err(CatalogError::NotBookable {
                flight_id: flight.id,
                status: flight.status,
            });
        }
        Ok(flight)
    }

    pub fn set_status(&self, flight_id: &Uuid, status: FlightStatus) -> Result<Flight, CatalogError> {
        self.modify(flight_id, |flight| {
            info!("Flight {} status {} -> {}", flight.code, flight.status.as_str(), status.as_str());
            flight.status = status;
            Ok(())
        })
    }

    /// Outstanding holds keep the price quoted when they were placed.
    pub fn set_base_price(&self, flight_id: &Uuid, base_price: i64) -> Result<Flight, CatalogError> {
        if base_price < 0 {
            return Err(CatalogError::Invalid("base_price cannot be negative".into()));
        }
        self.modify(flight_id, |flight| {
            flight.base_price = base_price;
            Ok(())
        })
    }

    pub fn revise_capacity(&self, flight_id: &Uuid, total_seats: u32) -> Result<Flight, CatalogError> {
        if total_seats == 0 {
            return Err(CatalogError::Invalid("total_seats must be positive".into()));
        }
        self.modify(flight_id, |flight| {
            if flight.capacity_locked {
                return Err(CatalogError::CapacityLocked(flight.id));
            }
            flight.total_seats = total_seats;
            Ok(())
        })
    }

    /// Freeze capacity and hand it to the ledger. Idempotent.
    pub(crate) fn lock_capacity(&self, flight_id: &Uuid) -> Result<u32, CatalogError> {
        let flight = self.modify(flight_id, |flight| {
            flight.capacity_locked = true;
            Ok(())
        })?;
        Ok(flight.total_seats)
    }

    fn modify<F>(&self, flight_id: &Uuid, f: F) -> Result<Flight, CatalogError>
    where
        F: FnOnce(&mut Flight) -> Result<(), CatalogError>,
    {
        let mut flights = self.flights.write().unwrap_or_else(|e| e.into_inner());
        let flight = flights
            .get_mut(flight_id)
            .ok_or(CatalogError::NotFound(*flight_id))?;
        f(flight)?;
        Ok(flight.clone())
    }
}

impl Default for FlightCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Flight not found: {0}")]
    NotFound(Uuid),

    #[error("Flight code already in use: {0}")]
    DuplicateCode(String),

    #[error("Capacity of flight {0} is locked by issued reservations")]
    CapacityLocked(Uuid),

    #[error("Flight {flight_id} is not open for booking (status {status:?})")]
    NotBookable {
        flight_id: Uuid,
        status: FlightStatus,
    },

    #[error("Invalid flight data: {0}")]
    Invalid(String),
}

impl From<CoreError> for CatalogError {
    fn from(err: CoreError) -> Self {
        CatalogError::Invalid(err.to_string())
    }
}

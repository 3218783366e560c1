use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use aero_catalog::{
    CatalogError, FlightCatalog, FlightStatus, HoldToken, InventoryLedger, InventorySnapshot,
    LedgerError, PricingEngine, PricingError,
};
use aero_shared::{AvailabilityChangedEvent, ReservationEvent};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::expiry::DeadlineQueue;
use crate::models::{Passenger, Reservation, ReservationState, Ticket};

/// Bounds applied to requested hold lifetimes
#[derive(Debug, Clone, Copy)]
pub struct HoldPolicy {
    pub default_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(900),
            max_ttl: Duration::from_secs(3600),
        }
    }
}

/// A reservation together with the ledger token backing it.
/// The entry mutex is the serialization point for the reservation's transitions.
struct Entry {
    reservation: Reservation,
    hold: HoldToken,
    /// Set while a charge for this hold is outstanding
    paying: bool,
}

/// Passenger document -> latest reservation id, for one flight.
/// `None` marks a confirmed reservation restored from storage.
type Roster = HashMap<String, Option<Uuid>>;

/// Orchestrates hold -> confirm / cancel / expire.
pub struct ReservationManager {
    catalog: Arc<FlightCatalog>,
    ledger: Arc<InventoryLedger>,
    pricing: PricingEngine,
    policy: HoldPolicy,
    reservations: RwLock<HashMap<Uuid, Arc<Mutex<Entry>>>>,
    rosters: RwLock<HashMap<Uuid, Arc<Mutex<Roster>>>>,
    deadlines: Arc<DeadlineQueue>,
    events: broadcast::Sender<ReservationEvent>,
    availability: broadcast::Sender<AvailabilityChangedEvent>,
}

impl ReservationManager {
    pub fn new(catalog: Arc<FlightCatalog>, ledger: Arc<InventoryLedger>, policy: HoldPolicy) -> Self {
        let (events, _) = broadcast::channel(1024);
        let (availability, _) = broadcast::channel(1024);

        Self {
            pricing: PricingEngine::new(catalog.clone()),
            catalog,
            ledger,
            policy,
            reservations: RwLock::new(HashMap::new()),
            rosters: RwLock::new(HashMap::new()),
            deadlines: Arc::new(DeadlineQueue::new()),
            events,
            availability,
        }
    }

    pub fn catalog(&self) -> &Arc<FlightCatalog> {
        &self.catalog
    }

    pub fn ledger(&self) -> &Arc<InventoryLedger> {
        &self.ledger
    }

    pub fn policy(&self) -> HoldPolicy {
        self.policy
    }

    pub fn deadlines(&self) -> &Arc<DeadlineQueue> {
        &self.deadlines
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReservationEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_availability(&self) -> broadcast::Receiver<AvailabilityChangedEvent> {
        self.availability.subscribe()
    }

    /// Place a hold of `seats` seats for `ttl` on behalf of `passenger`,
    /// pricing it at this instant.
    ///
    /// A passenger may have one held or confirmed reservation per flight.
    /// A failed attempt leaves no reservation record behind.
    pub fn create_reservation(
        &self,
        flight_id: &Uuid,
        seats: u32,
        ttl: Duration,
        passenger: Passenger,
    ) -> Result<Reservation, ReservationError> {
        if ttl.is_zero() {
            return Err(ReservationError::InvalidTtl);
        }
        let ttl = ttl.min(self.policy.max_ttl);
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| ReservationError::InvalidTtl)?;
        let passenger = passenger.normalized().ok_or_else(|| {
            ReservationError::Invalid("passenger name and document are required".to_string())
        })?;

        self.catalog.ensure_bookable(flight_id)?;

        // Held until the reservation is registered, so one document cannot race itself
        let roster = self.roster(flight_id);
        let mut roster = lock(&roster);
        if let Some(existing) = roster.get(&passenger.document) {
            if existing.map_or(true, |id| self.is_active(&id)) {
                warn!("Passenger {} already holds a place on flight {}", passenger.document, flight_id);
                return Err(ReservationError::DuplicatePassenger {
                    flight_id: *flight_id,
                    document: passenger.document,
                });
            }
        }

        let (hold, inventory) = match self.ledger.try_reserve(flight_id, seats) {
            Ok(granted) => granted,
            Err(e) => {
                warn!("Hold of {} seat(s) on flight {} refused: {}", seats, flight_id, e);
                return Err(e.into());
            }
        };

        let quote = match self.pricing.quote(flight_id, seats) {
            Ok(quote) => quote,
            Err(e) => {
                // Do not leak the seats of a hold nobody owns
                match self.ledger.release(&hold) {
                    Ok(Some(released)) => self.publish_availability(&released),
                    Ok(None) => {}
                    Err(release_err) => {
                        error!("Failed to release unpriced hold {}: {}", hold.hold_id(), release_err)
                    }
                }
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let reservation = Reservation::held(*flight_id, seats, quote.total, quote.currency, passenger, now, now + ttl);
        let snapshot = reservation.clone();

        self.reservations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                reservation.id,
                Arc::new(Mutex::new(Entry {
                    reservation,
                    hold,
                    paying: false,
                })),
            );
        roster.insert(snapshot.passenger.document.clone(), Some(snapshot.id));
        drop(roster);
        self.deadlines.register(snapshot.id, snapshot.expiry_deadline);

        info!(
            "Reservation {} ({}) held: {} seat(s) on flight {} for {} {}, expires {}",
            snapshot.id, snapshot.code, seats, flight_id, snapshot.price, snapshot.currency, snapshot.expiry_deadline
        );
        self.publish(&snapshot, Some(inventory));
        Ok(snapshot)
    }

    /// Commit the held seats. Payment must already have succeeded.
    pub fn confirm(&self, reservation_id: &Uuid) -> Result<Reservation, ReservationError> {
        let (snapshot, inventory) = self.transition(reservation_id, ReservationState::Confirmed, |ledger, hold| {
            ledger.commit(hold).map(Some)
        })?;
        self.deadlines.deregister(reservation_id);

        info!("Reservation {} confirmed", reservation_id);
        self.publish(&snapshot, inventory);
        Ok(snapshot)
    }

    pub fn cancel(&self, reservation_id: &Uuid) -> Result<Reservation, ReservationError> {
        let (snapshot, inventory) = self.transition(reservation_id, ReservationState::Cancelled, release)?;
        self.deadlines.deregister(reservation_id);

        info!("Reservation {} cancelled", reservation_id);
        self.publish(&snapshot, inventory);
        Ok(snapshot)
    }

    /// Expire a hold whose deadline has passed at `now`.
    ///
    /// Races with `confirm`/`cancel` are settled by whoever transitions the
    /// entry first; the loser gets `AlreadyTerminal`.
    pub fn expire(&self, reservation_id: &Uuid, now: DateTime<Utc>) -> Result<Reservation, ReservationError> {
        let entry = self.entry(reservation_id)?;
        let (snapshot, inventory) = {
            let mut entry = lock(&entry);
            Self::ensure_held(&entry.reservation)?;
            if !entry.reservation.is_due(now) {
                return Err(ReservationError::NotYetDue {
                    reservation_id: *reservation_id,
                    deadline: entry.reservation.expiry_deadline,
                });
            }
            let inventory = release(&self.ledger, &entry.hold)?;
            entry.reservation.apply(ReservationState::Expired);
            (entry.reservation.clone(), inventory)
        };

        info!("Reservation {} expired, {} seat(s) released", reservation_id, snapshot.seats);
        self.publish(&snapshot, inventory);
        Ok(snapshot)
    }

    /// Record a confirmed reservation made by a previous process, so the
    /// passenger cannot book the flight again.
    pub fn restore_passenger(&self, flight_id: &Uuid, document: &str) {
        let Some(passenger) = Passenger::new("-", document).normalized() else {
            return;
        };
        lock(&self.roster(flight_id)).insert(passenger.document, None);
    }

    /// Claim a held reservation for one charge. Only one claim can be
    /// outstanding; it ends with `confirm` or `end_payment`.
    pub fn begin_payment(&self, reservation_id: &Uuid) -> Result<Reservation, ReservationError> {
        let entry = self.entry(reservation_id)?;
        let mut entry = lock(&entry);

        Self::ensure_held(&entry.reservation)?;
        if entry.paying {
            return Err(ReservationError::PaymentInProgress(*reservation_id));
        }
        entry.paying = true;
        Ok(entry.reservation.clone())
    }

    /// Drop the claim taken by `begin_payment` without confirming.
    pub fn end_payment(&self, reservation_id: &Uuid) {
        if let Ok(entry) = self.entry(reservation_id) {
            lock(&entry).paying = false;
        }
    }

    /// Issue the e-ticket of a confirmed reservation. Repeated calls return
    /// the ticket issued first.
    pub fn issue_ticket(&self, reservation_id: &Uuid) -> Result<(Reservation, Ticket), ReservationError> {
        let entry = self.entry(reservation_id)?;
        let (snapshot, ticket, issued) = {
            let mut entry = lock(&entry);
            if entry.reservation.state != ReservationState::Confirmed {
                return Err(ReservationError::NotConfirmed {
                    reservation_id: *reservation_id,
                    state: entry.reservation.state,
                });
            }
            let (ticket, issued) = entry.reservation.issue_ticket(Utc::now());
            (entry.reservation.clone(), ticket, issued)
        };

        if issued {
            info!("Ticket {} issued for reservation {}", ticket.code, reservation_id);
            let _ = self.events.send(snapshot.to_event());
        }
        Ok((snapshot, ticket))
    }

    pub fn get(&self, reservation_id: &Uuid) -> Result<Reservation, ReservationError> {
        let entry = self.entry(reservation_id)?;
        let reservation = lock(&entry).reservation.clone();
        Ok(reservation)
    }

    /// Every reservation ever made against a flight, oldest first
    pub fn list_for_flight(&self, flight_id: &Uuid) -> Vec<Reservation> {
        let mut list = self.list();
        list.retain(|r| r.flight_id == *flight_id);
        list
    }

    /// Every reservation in this process, oldest first
    pub fn list(&self) -> Vec<Reservation> {
        let entries: Vec<Arc<Mutex<Entry>>> = self
            .reservations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut list: Vec<Reservation> = entries
            .iter()
            .map(|entry| lock(entry).reservation.clone())
            .collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    pub fn availability(&self, flight_id: &Uuid) -> Result<InventorySnapshot, ReservationError> {
        Ok(self.ledger.availability(flight_id)?)
    }

    /// Run a ledger mutation and a state transition as one step under the entry lock.
    fn transition<F>(
        &self,
        reservation_id: &Uuid,
        next: ReservationState,
        ledger_op: F,
    ) -> Result<(Reservation, Option<InventorySnapshot>), ReservationError>
    where
        F: FnOnce(&InventoryLedger, &HoldToken) -> Result<Option<InventorySnapshot>, LedgerError>,
    {
        let entry = self.entry(reservation_id)?;
        let mut entry = lock(&entry);

        Self::ensure_held(&entry.reservation)?;
        if !entry.reservation.state.can_transition_to(next) {
            return Err(ReservationError::AlreadyTerminal {
                reservation_id: *reservation_id,
                state: entry.reservation.state,
            });
        }

        let inventory = ledger_op(self.ledger.as_ref(), &entry.hold)?;
        entry.reservation.apply(next);
        entry.paying = false;
        Ok((entry.reservation.clone(), inventory))
    }

    fn ensure_held(reservation: &Reservation) -> Result<(), ReservationError> {
        if reservation.state.is_terminal() {
            return Err(ReservationError::AlreadyTerminal {
                reservation_id: reservation.id,
                state: reservation.state,
            });
        }
        Ok(())
    }

    fn entry(&self, reservation_id: &Uuid) -> Result<Arc<Mutex<Entry>>, ReservationError> {
        self.reservations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(reservation_id)
            .cloned()
            .ok_or(ReservationError::NotFound(*reservation_id))
    }

    fn is_active(&self, reservation_id: &Uuid) -> bool {
        self.entry(reservation_id)
            .map(|entry| lock(&entry).reservation.state.is_active())
            .unwrap_or(false)
    }

    fn roster(&self, flight_id: &Uuid) -> Arc<Mutex<Roster>> {
        if let Some(roster) = self.rosters.read().unwrap_or_else(|e| e.into_inner()).get(flight_id) {
            return roster.clone();
        }
        self.rosters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(*flight_id)
            .or_default()
            .clone()
    }

    /// Subscribers are optional; sends without receivers are dropped.
    fn publish(&self, reservation: &Reservation, inventory: Option<InventorySnapshot>) {
        let _ = self.events.send(reservation.to_event());
        if let Some(snap) = inventory {
            self.publish_availability(&snap);
        }
    }

    fn publish_availability(&self, snap: &InventorySnapshot) {
        let _ = self.availability.send(AvailabilityChangedEvent {
            flight_id: snap.flight_id,
            total_seats: snap.total_seats,
            committed_seats: snap.committed_seats,
            held_seats: snap.held_seats,
            available_seats: snap.available_seats,
            version: snap.version,
            timestamp: Utc::now().timestamp(),
        });
    }
}

fn release(ledger: &InventoryLedger, hold: &HoldToken) -> Result<Option<InventorySnapshot>, LedgerError> {
    let released = ledger.release(hold)?;
    if released.is_none() {
        warn!("Hold {} was already released", hold.hold_id());
    }
    Ok(released)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Not found: {0}")]
    NotFound(Uuid),

    #[error("Reservation {reservation_id} is already {state:?}")]
    AlreadyTerminal {
        reservation_id: Uuid,
        state: ReservationState,
    },

    #[error("Reservation {reservation_id} is not due to expire before {deadline}")]
    NotYetDue {
        reservation_id: Uuid,
        deadline: DateTime<Utc>,
    },

    #[error("Insufficient capacity on flight {flight_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        flight_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Unknown hold: {0}")]
    UnknownHold(Uuid),

    #[error("Flight {flight_id} is not open for booking (status {status:?})")]
    FlightNotBookable {
        flight_id: Uuid,
        status: FlightStatus,
    },

    #[error("Ledger for flight {0} is halted pending reconciliation")]
    LedgerHalted(Uuid),

    #[error("A payment for reservation {0} is already in progress")]
    PaymentInProgress(Uuid),

    #[error("Passenger {document} already has an active reservation on flight {flight_id}")]
    DuplicatePassenger {
        flight_id: Uuid,
        document: String,
    },

    #[error("Reservation {reservation_id} is {state:?}; tickets are only issued for confirmed reservations")]
    NotConfirmed {
        reservation_id: Uuid,
        state: ReservationState,
    },

    #[error("Hold lifetime must be positive")]
    InvalidTtl,

    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl From<CatalogError> for ReservationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => ReservationError::NotFound(id),
            CatalogError::NotBookable { flight_id, status } => {
                ReservationError::FlightNotBookable { flight_id, status }
            }
            other => ReservationError::Invalid(other.to_string()),
        }
    }
}

impl From<LedgerError> for ReservationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Catalog(e) => e.into(),
            LedgerError::InvalidSeatCount => {
                ReservationError::Invalid("seat count must be positive".to_string())
            }
            LedgerError::InsufficientCapacity {
                flight_id,
                requested,
                available,
            } => ReservationError::InsufficientCapacity {
                flight_id,
                requested,
                available,
            },
            LedgerError::UnknownHold(id) => ReservationError::UnknownHold(id),
            LedgerError::InvariantViolation(id) | LedgerError::Halted(id) => {
                ReservationError::LedgerHalted(id)
            }
        }
    }
}

impl From<PricingError> for ReservationError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::Catalog(e) => e.into(),
            other => ReservationError::Invalid(other.to_string()),
        }
    }
}

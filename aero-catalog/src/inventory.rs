use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::flight::{CatalogError, FlightCatalog};

/// Proof of a granted hold: which flight, how many seats.
///
/// Tokens are only minted by [`InventoryLedger::try_reserve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldToken {
    hold_id: Uuid,
    flight_id: Uuid,
    seats: u32,
}

impl HoldToken {
    pub fn hold_id(&self) -> Uuid {
        self.hold_id
    }

    pub fn flight_id(&self) -> Uuid {
        self.flight_id
    }

    pub fn seats(&self) -> u32 {
        self.seats
    }
}

/// Seat counters of one flight at a single point in its serialization order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub flight_id: Uuid,
    pub total_seats: u32,
    pub committed_seats: u32,
    pub held_seats: u32,
    pub available_seats: u32,
    /// Number of mutations applied to the flight so far
    pub version: u64,
}

/// Per-flight record. Only touched while its mutex is held.
#[derive(Debug)]
struct FlightInventory {
    flight_id: Uuid,
    total_seats: u32,
    committed_seats: u32,
    held_seats: u32,
    holds: HashMap<Uuid, u32>,
    version: u64,
    halted: bool,
}

impl FlightInventory {
    fn new(flight_id: Uuid, total_seats: u32) -> Self {
        Self {
            flight_id,
            total_seats,
            committed_seats: 0,
            held_seats: 0,
            holds: HashMap::new(),
            version: 0,
            halted: false,
        }
    }

    /// `None` when committed + held exceeds capacity.
    fn available(&self) -> Option<u32> {
        self.committed_seats
            .checked_add(self.held_seats)
            .and_then(|used| self.total_seats.checked_sub(used))
    }

    fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            flight_id: self.flight_id,
            total_seats: self.total_seats,
            committed_seats: self.committed_seats,
            held_seats: self.held_seats,
            available_seats: self.available().unwrap_or(0),
            version: self.version,
        }
    }

    fn ensure_live(&self) -> Result<(), LedgerError> {
        if self.halted {
            return Err(LedgerError::Halted(self.flight_id));
        }
        Ok(())
    }

    /// Stops all further mutation of this flight on the first violation.
    fn halt(&mut self, reason: &str) -> LedgerError {
        self.halted = true;
        error!(
            flight_id = %self.flight_id,
            total = self.total_seats,
            committed = self.committed_seats,
            held = self.held_seats,
            "Inventory invariant violated ({}); ledger halted pending reconciliation",
            reason
        );
        LedgerError::InvariantViolation(self.flight_id)
    }

    fn verify(&mut self) -> Result<(), LedgerError> {
        let tracked: u64 = self.holds.values().map(|&s| u64::from(s)).sum();
        if self.available().is_none() {
            return Err(self.halt("committed + held exceeds total"));
        }
        if tracked != u64::from(self.held_seats) {
            return Err(self.halt("held seats disagree with active holds"));
        }
        Ok(())
    }

    /// Verify a mutation and stamp the resulting state with the next version.
    fn settle(&mut self) -> Result<InventorySnapshot, LedgerError> {
        self.verify()?;
        self.version += 1;
        Ok(self.snapshot())
    }
}

/// Sole authority on seat counts.
///
/// Every flight has its own record behind its own mutex, so operations on
/// different flights never contend. The outer map lock is only held long
/// enough to find or open a record.
pub struct InventoryLedger {
    catalog: Arc<FlightCatalog>,
    flights: RwLock<HashMap<Uuid, Arc<Mutex<FlightInventory>>>>,
}

impl InventoryLedger {
    pub fn new(catalog: Arc<FlightCatalog>) -> Self {
        Self {
            catalog,
            flights: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<FlightCatalog> {
        &self.catalog
    }

    /// Atomically hold `seats` seats if that many are available.
    ///
    /// Every mutating call returns the counters as they stood when the flight
    /// lock was released, so callers can publish them without a second read.
    pub fn try_reserve(&self, flight_id: &Uuid, seats: u32) -> Result<(HoldToken, InventorySnapshot), LedgerError> {
        if seats == 0 {
            return Err(LedgerError::InvalidSeatCount);
        }

        let record = self.open(flight_id)?;
        let mut inv = lock(&record);
        inv.ensure_live()?;

        let available = match inv.available() {
            Some(available) => available,
            None => return Err(inv.halt("negative availability observed")),
        };
        if available < seats {
            return Err(LedgerError::InsufficientCapacity {
                flight_id: *flight_id,
                requested: seats,
                available,
            });
        }

        let token = HoldToken {
            hold_id: Uuid::new_v4(),
            flight_id: *flight_id,
            seats,
        };
        inv.held_seats += seats;
        inv.holds.insert(token.hold_id, seats);
        let snapshot = inv.settle()?;

        Ok((token, snapshot))
    }

    /// Move a hold's seats from held to committed. A token can be committed once.
    pub fn commit(&self, token: &HoldToken) -> Result<InventorySnapshot, LedgerError> {
        let record = self.existing(token)?;
        let mut inv = lock(&record);
        inv.ensure_live()?;

        let seats = match inv.holds.remove(&token.hold_id) {
            Some(seats) => seats,
            None => {
                error!(hold_id = %token.hold_id, flight_id = %token.flight_id, "Commit of unknown or spent hold token");
                return Err(LedgerError::UnknownHold(token.hold_id));
            }
        };

        match inv.held_seats.checked_sub(seats) {
            Some(held) => inv.held_seats = held,
            None => return Err(inv.halt("held seats underflow on commit")),
        }
        inv.committed_seats += seats;
        inv.settle()
    }

    /// Return a hold's seats to the pool.
    ///
    /// Releasing a token that was already released or committed is a no-op
    /// and reports `None`.
    pub fn release(&self, token: &HoldToken) -> Result<Option<InventorySnapshot>, LedgerError> {
        let record = match self.lookup(&token.flight_id) {
            Some(record) => record,
            None => return Ok(None),
        };
        let mut inv = lock(&record);
        inv.ensure_live()?;

        let seats = match inv.holds.remove(&token.hold_id) {
            Some(seats) => seats,
            None => return Ok(None),
        };

        match inv.held_seats.checked_sub(seats) {
            Some(held) => inv.held_seats = held,
            None => return Err(inv.halt("held seats underflow on release")),
        }
        inv.settle().map(Some)
    }

    /// Reload committed seats recorded by a previous process. Holds are not
    /// carried over. A count beyond capacity halts the flight.
    ///
    /// Versions resume after `version` so snapshots written by this process
    /// always supersede the ones it restored from.
    pub fn restore_committed(
        &self,
        flight_id: &Uuid,
        committed_seats: u32,
        version: u64,
    ) -> Result<InventorySnapshot, LedgerError> {
        let record = self.open(flight_id)?;
        let mut inv = lock(&record);
        inv.ensure_live()?;

        inv.committed_seats = committed_seats;
        inv.verify()?;
        inv.version = inv.version.max(version);
        Ok(inv.snapshot())
    }

    /// Current counters. A flight without holds yet reports its full capacity.
    pub fn availability(&self, flight_id: &Uuid) -> Result<InventorySnapshot, LedgerError> {
        if let Some(record) = self.lookup(flight_id) {
            return Ok(lock(&record).snapshot());
        }

        let flight = self.catalog.get(flight_id)?;
        Ok(InventorySnapshot {
            flight_id: flight.id,
            total_seats: flight.total_seats,
            committed_seats: 0,
            held_seats: 0,
            available_seats: flight.total_seats,
            version: 0,
        })
    }

    pub fn is_halted(&self, flight_id: &Uuid) -> bool {
        self.lookup(flight_id).map_or(false, |record| lock(&record).halted)
    }

    fn lookup(&self, flight_id: &Uuid) -> Option<Arc<Mutex<FlightInventory>>> {
        self.flights
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(flight_id)
            .cloned()
    }

    fn existing(&self, token: &HoldToken) -> Result<Arc<Mutex<FlightInventory>>, LedgerError> {
        self.lookup(&token.flight_id)
            .ok_or(LedgerError::UnknownHold(token.hold_id))
    }

    /// Find the flight's record, opening it from the catalog on first use.
    /// Opening freezes the catalog capacity.
    fn open(&self, flight_id: &Uuid) -> Result<Arc<Mutex<FlightInventory>>, LedgerError> {
        if let Some(record) = self.lookup(flight_id) {
            return Ok(record);
        }

        let mut flights = self.flights.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = flights.get(flight_id) {
            return Ok(record.clone());
        }

        let total_seats = self.catalog.lock_capacity(flight_id)?;
        let record = Arc::new(Mutex::new(FlightInventory::new(*flight_id, total_seats)));
        flights.insert(*flight_id, record.clone());
        Ok(record)
    }
}

fn lock(record: &Mutex<FlightInventory>) -> MutexGuard<'_, FlightInventory> {
    // The halted flag, not the poison flag, guards against a half-applied mutation.
    record.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Seat count must be positive")]
    InvalidSeatCount,

    #[error("Insufficient capacity on flight {flight_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        flight_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Unknown hold: {0}")]
    UnknownHold(Uuid),

    #[error("Inventory invariant violated on flight {0}")]
    InvariantViolation(Uuid),

    #[error("Ledger for flight {0} is halted pending reconciliation")]
    Halted(Uuid),
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aero_core::payment::PaymentAdapter;
use aero_core::repository::{FlightRepository, ReservationRepository};
use aero_order::{PaymentOrchestrator, ReservationManager, ReservationState};
use aero_shared::AvailabilityChangedEvent;
use anyhow::anyhow;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::middleware::CircuitBreaker;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ReservationManager>,
    pub payments: Arc<PaymentOrchestrator>,
    pub flight_repo: Arc<dyn FlightRepository>,
    pub reservation_repo: Arc<dyn ReservationRepository>,
    pub payment_cb: Arc<CircuitBreaker>,
}

/// What `AppState::bootstrap` recovered from the repositories
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub flights: usize,
    pub inventories: usize,
    pub stale_holds: usize,
}

impl AppState {
    pub fn new(
        manager: Arc<ReservationManager>,
        adapter: Arc<dyn PaymentAdapter>,
        flight_repo: Arc<dyn FlightRepository>,
        reservation_repo: Arc<dyn ReservationRepository>,
    ) -> Self {
        Self {
            payments: Arc::new(PaymentOrchestrator::new(manager.clone(), adapter)),
            manager,
            flight_repo,
            reservation_repo,
            payment_cb: Arc::new(CircuitBreaker::new("payments", 5, Duration::from_secs(30))),
        }
    }

    /// Seed the catalog and ledger from persisted state.
    ///
    /// Committed seats are restored per flight from the newest inventory
    /// snapshot, raised to the seats of CONFIRMED rows if those are ahead.
    /// Passengers of CONFIRMED rows keep their place on the flight.
    /// Holds do not survive a restart: rows still marked HELD are closed as
    /// EXPIRED, since their seats are no longer reserved in the ledger.
    pub async fn bootstrap(&self) -> anyhow::Result<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let catalog = self.manager.catalog();
        let ledger = self.manager.ledger();

        let records = self
            .flight_repo
            .load_flights()
            .await
            .map_err(|e| anyhow!("Failed to load flights: {}", e))?;
        for record in records {
            let code = record.code.clone();
            match catalog.upsert(record) {
                Ok(_) => report.flights += 1,
                Err(e) => warn!("Skipping flight {} from feed: {}", code, e),
            }
        }

        let mut snapshots: HashMap<Uuid, AvailabilityChangedEvent> = HashMap::new();
        for row in self
            .reservation_repo
            .load_inventory()
            .await
            .map_err(|e| anyhow!("Failed to load inventory: {}", e))?
        {
            if catalog.get(&row.flight_id).is_err() {
                warn!("Inventory row for unknown flight {} ignored", row.flight_id);
                continue;
            }
            snapshots.insert(row.flight_id, row);
        }

        for flight in catalog.list() {
            let rows = self
                .reservation_repo
                .list_reservations(flight.id)
                .await
                .map_err(|e| anyhow!("Failed to load reservations of flight {}: {}", flight.code, e))?;

            let confirmed: Vec<_> = rows
                .iter()
                .filter(|r| r.state == ReservationState::Confirmed.as_str())
                .collect();
            for row in &confirmed {
                self.manager.restore_passenger(&flight.id, &row.passenger_document);
            }
            let confirmed_seats: u32 = confirmed.iter().map(|r| r.seats).sum();

            let (snapshot_seats, version) = snapshots
                .get(&flight.id)
                .map_or((0, 0), |s| (s.committed_seats, s.version));
            if confirmed_seats > snapshot_seats {
                warn!(
                    "Inventory of flight {} is behind its reservations ({} < {} committed seats)",
                    flight.code, snapshot_seats, confirmed_seats
                );
            }

            let committed = snapshot_seats.max(confirmed_seats);
            if committed == 0 {
                continue;
            }
            match ledger.restore_committed(&flight.id, committed, version) {
                Ok(_) => report.inventories += 1,
                Err(e) => error!("Failed to restore inventory of flight {}: {}", flight.code, e),
            }
        }

        let held = self
            .reservation_repo
            .list_held()
            .await
            .map_err(|e| anyhow!("Failed to load held reservations: {}", e))?;
        for mut row in held {
            row.state = ReservationState::Expired.as_str().to_string();
            row.timestamp = Utc::now().timestamp();
            match self.reservation_repo.save_reservation(&row).await {
                Ok(()) => report.stale_holds += 1,
                Err(e) => error!("Failed to close stale hold {}: {}", row.reservation_id, e),
            }
        }

        info!(
            "Bootstrap complete: {} flight(s), {} inventory record(s) restored, {} stale hold(s) expired",
            report.flights, report.inventories, report.stale_holds
        );
        Ok(report)
    }
}

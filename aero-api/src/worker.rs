use std::sync::{Arc, Weak};

use aero_core::repository::ReservationRepository;
use aero_order::ReservationManager;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Writes reservation and inventory snapshots through the repository.
///
/// Runs off the booking path: a slow or failing store only delays rows, it
/// never blocks or fails a transition. Exits once the manager is dropped.
pub fn start_persistence_worker(
    manager: &Arc<ReservationManager>,
    repo: Arc<dyn ReservationRepository>,
) -> JoinHandle<()> {
    let mut reservations = manager.subscribe();
    let mut availability = manager.subscribe_availability();
    // Weak, so the worker does not keep the channels open
    let manager = Arc::downgrade(manager);

    tokio::spawn(async move {
        info!("Persistence worker started");
        let mut reservations_open = true;
        let mut availability_open = true;

        while reservations_open || availability_open {
            tokio::select! {
                received = reservations.recv(), if reservations_open => match received {
                    Ok(event) => {
                        debug!("Persisting reservation {} as {}", event.reservation_id, event.state);
                        if let Err(e) = repo.save_reservation(&event).await {
                            error!("Failed to persist reservation {}: {}", event.reservation_id, e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Persistence worker lagged, {} reservation event(s) skipped; resyncing", skipped);
                        resync(&manager, repo.as_ref()).await;
                    }
                    Err(RecvError::Closed) => reservations_open = false,
                },
                received = availability.recv(), if availability_open => match received {
                    Ok(snapshot) => {
                        if let Err(e) = repo.save_inventory(&snapshot).await {
                            error!("Failed to persist inventory of flight {}: {}", snapshot.flight_id, e);
                        }
                    }
                    // A later snapshot of the same flight supersedes the skipped ones
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Skipped {} inventory snapshot(s)", skipped);
                    }
                    Err(RecvError::Closed) => availability_open = false,
                },
            }
        }

        info!("Persistence worker stopped");
    })
}

/// Rewrite every reservation the manager knows from its current state.
///
/// Saves are idempotent and never move a row out of a terminal state, so
/// replaying rows that were already written is harmless. Returns how many
/// rows were written.
pub async fn resync(manager: &Weak<ReservationManager>, repo: &dyn ReservationRepository) -> usize {
    let Some(manager) = manager.upgrade() else {
        return 0;
    };
    let reservations = manager.list();
    drop(manager);

    let mut written = 0;
    for reservation in reservations {
        match repo.save_reservation(&reservation.to_event()).await {
            Ok(()) => written += 1,
            Err(e) => error!("Failed to resync reservation {}: {}", reservation.id, e),
        }
    }
    info!("Resynced {} reservation(s)", written);
    written
}

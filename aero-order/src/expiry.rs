use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::manager::{ReservationError, ReservationManager};

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
    pending: HashSet<Uuid>,
}

/// Pending hold deadlines, earliest first.
///
/// Deregistration is lazy: the id leaves `pending` and its heap entry is
/// dropped when it reaches the top.
#[derive(Default)]
pub struct DeadlineQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reservation_id: Uuid, deadline: DateTime<Utc>) {
        {
            let mut state = self.lock();
            state.pending.insert(reservation_id);
            state.heap.push(Reverse((deadline, reservation_id)));
        }
        self.notify.notify_one();
    }

    pub fn deregister(&self, reservation_id: &Uuid) -> bool {
        self.lock().pending.remove(reservation_id)
    }

    /// Remove and return every pending id whose deadline is `<= now`.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut state = self.lock();
        let mut due = Vec::new();

        while let Some(Reverse((deadline, id))) = state.heap.peek().copied() {
            if deadline > now {
                break;
            }
            state.heap.pop();
            if state.pending.remove(&id) {
                due.push(id);
            }
        }

        due
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let mut state = self.lock();

        while let Some(Reverse((deadline, id))) = state.heap.peek().copied() {
            if state.pending.contains(&id) {
                return Some(deadline);
            }
            state.heap.pop();
        }

        None
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Background task that expires holds once their deadline passes.
///
/// It never touches the ledger itself: every expiry goes through
/// [`ReservationManager::expire`], the same path and race rule used by
/// manual confirm/cancel.
pub struct ExpiryScheduler {
    manager: Arc<ReservationManager>,
    max_sleep: Duration,
}

/// Shortest idle interval between sweeps when no deadline is pending
const MIN_SLEEP: Duration = Duration::from_millis(10);

impl ExpiryScheduler {
    /// `max_sleep` bounds the idle wait between sweeps; it is raised to at least 10ms.
    pub fn new(manager: Arc<ReservationManager>, max_sleep: Duration) -> Self {
        Self {
            manager,
            max_sleep: max_sleep.max(MIN_SLEEP),
        }
    }

    /// Expire everything due at `now`. Returns how many holds were expired.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let queue = self.manager.deadlines();
        let mut expired = 0;

        for id in queue.pop_due(now) {
            match self.manager.expire(&id, now) {
                Ok(_) => expired += 1,
                // Lost the race against confirm/cancel
                Err(ReservationError::AlreadyTerminal { .. }) | Err(ReservationError::NotFound(_)) => {
                    debug!("Skipping expiry of {}: no longer held", id);
                }
                Err(ReservationError::NotYetDue { deadline, .. }) => {
                    queue.register(id, deadline);
                }
                Err(e) => {
                    error!("Failed to expire reservation {}: {}", id, e);
                }
            }
        }

        if expired > 0 {
            info!("Expiry sweep released {} hold(s)", expired);
        }
        expired
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Expiry scheduler started");
        let queue = self.manager.deadlines().clone();

        loop {
            self.sweep(Utc::now());

            let wait = queue
                .next_deadline()
                .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(self.max_sleep)
                .min(self.max_sleep);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = queue.notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !queue.is_empty() {
            warn!("Expiry scheduler stopped with {} pending hold(s)", queue.len());
        }
        info!("Expiry scheduler stopped");
    }

    /// Run on the current tokio runtime. Send `true` on the returned channel to stop.
    pub fn spawn(self) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(rx));
        (handle, tx)
    }
}

use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    /// A single trial request is let through
    HalfOpen,
}

/// Guards calls to the payment collaborator. Trips after `failure_threshold`
/// consecutive server errors and fails fast until `reset_timeout` has passed.
/// Then a single trial request is admitted; its outcome closes or reopens the breaker.
pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    /// Set while the half-open trial request is outstanding
    trial_in_flight: AtomicBool,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            trial_in_flight: AtomicBool::new(false),
            failure_threshold: threshold,
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a request may go through. While half-open only the first
    /// caller is admitted until its outcome is recorded.
    pub async fn check(&self) -> bool {
        match self.current().await {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.claim_trial(),
            CircuitState::Open => {
                let elapsed = self.last_failure.read().await.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed > self.reset_timeout => {
                        {
                            let mut state = self.state.write().await;
                            if *state == CircuitState::Open {
                                *state = CircuitState::HalfOpen;
                                tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                            }
                        }
                        self.claim_trial()
                    }
                    _ => false,
                }
            }
        }
    }

    fn claim_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        }
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.last_failure.write().await = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }
}

/// Applies the payment breaker to `POST /v1/holds/{id}/pay`.
pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> impl IntoResponse {
    let path = req.uri().path();
    if !(path.starts_with("/v1/holds/") && path.ends_with("/pay")) {
        return next.run(req).await.into_response();
    }

    let cb = &state.payment_cb;
    if !cb.check().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("Circuit Breaker [{}] is OPEN", cb.name) })),
        )
            .into_response();
    }

    let response = next.run(req).await;

    // Declines and conflicts are answers from a healthy gateway
    if response.status().is_server_error() {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }

    response.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_breaker_trips_and_recovers() {
        let cb = CircuitBreaker::new("payments", 2, Duration::from_millis(50));
        assert!(cb.check().await);

        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);
        assert!(!cb.check().await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.check().await);
        assert_eq!(cb.current().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.current().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("payments", 5, Duration::from_millis(10));
        for _ in 0..5 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.check().await);

        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);
        assert!(!cb.check().await);
    }

    #[tokio::test]
    async fn test_half_open_admits_a_single_trial() {
        let cb = CircuitBreaker::new("payments", 1, Duration::from_millis(10));
        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cb.check().await);
        assert!(!cb.check().await);
        assert!(!cb.check().await);
        assert_eq!(cb.current().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.current().await, CircuitState::Closed);
        assert!(cb.check().await);
        assert!(cb.check().await);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_trial() {
        let cb = std::sync::Arc::new(CircuitBreaker::new("payments", 1, Duration::from_millis(10)));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                tokio::spawn(async move { cb.check().await })
            })
            .collect();
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}

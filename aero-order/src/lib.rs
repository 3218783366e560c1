pub mod models;
pub mod manager;
pub mod expiry;
pub mod orchestrator;

pub use models::{Passenger, Reservation, ReservationState, Ticket};
pub use manager::{HoldPolicy, ReservationError, ReservationManager};
pub use expiry::{DeadlineQueue, ExpiryScheduler};
pub use orchestrator::{MockPaymentAdapter, PaymentError, PaymentOrchestrator};

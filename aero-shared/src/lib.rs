pub mod models;

pub use models::events::{AvailabilityChangedEvent, ReservationEvent};

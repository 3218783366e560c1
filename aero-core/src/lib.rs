pub mod feed;
pub mod search;
pub mod repository;
pub mod payment;

pub use feed::{FlightRecord, FlightStatus};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

pub mod flight;
pub mod pricing;
pub mod inventory;

pub use flight::{CatalogError, Flight, FlightCatalog};
pub use pricing::{PricingEngine, PricingError, Quote};
pub use inventory::{HoldToken, InventoryLedger, InventorySnapshot, LedgerError};
pub use aero_core::FlightStatus;

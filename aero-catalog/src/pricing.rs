use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flight::{CatalogError, FlightCatalog};

/// Fare quoted for a hold. Stored on the reservation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub flight_id: Uuid,
    pub seats: u32,
    pub unit_price: i64,
    pub total: i64,
    pub currency: String,
    pub quoted_at: DateTime<Utc>,
}

/// Single-fare pricing: base price times seat count, read at the instant of the call.
pub struct PricingEngine {
    catalog: Arc<FlightCatalog>,
}

impl PricingEngine {
    pub fn new(catalog: Arc<FlightCatalog>) -> Self {
        Self { catalog }
    }

    pub fn quote(&self, flight_id: &Uuid, seats: u32) -> Result<Quote, PricingError> {
        let flight = self.catalog.get(flight_id)?;

        let total = flight
            .base_price
            .checked_mul(i64::from(seats))
            .ok_or(PricingError::PriceOverflow {
                flight_id: *flight_id,
                seats,
            })?;

        Ok(Quote {
            flight_id: flight.id,
            seats,
            unit_price: flight.base_price,
            total,
            currency: flight.currency,
            quoted_at: Utc::now(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Price overflow quoting {seats} seats on flight {flight_id}")]
    PriceOverflow { flight_id: Uuid, seats: u32 },
}

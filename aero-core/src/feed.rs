use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Operational status of a scheduled flight
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled,
    Boarding,
    Departed,
    Cancelled,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Scheduled => "SCHEDULED",
            FlightStatus::Boarding => "BOARDING",
            FlightStatus::Departed => "DEPARTED",
            FlightStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(FlightStatus::Scheduled),
            "BOARDING" => Ok(FlightStatus::Boarding),
            "DEPARTED" => Ok(FlightStatus::Departed),
            "CANCELLED" => Ok(FlightStatus::Cancelled),
            other => Err(CoreError::ValidationError(format!("unknown flight status: {}", other))),
        }
    }
}

fn default_currency() -> String {
    "EUR".to_string()
}

fn default_status() -> FlightStatus {
    FlightStatus::Scheduled
}

/// One record of the catalog feed. The feed is the source of truth for
/// schedule facts and capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightRecord {
    pub flight_id: Uuid,
    pub code: String,
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub arrival: Option<DateTime<Utc>>,
    /// Minor currency units per seat
    pub base_price: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub total_seats: u32,
    #[serde(default = "default_status")]
    pub status: FlightStatus,
}

impl FlightRecord {
    /// Departure as a UTC instant
    pub fn departure(&self) -> DateTime<Utc> {
        self.date.and_time(self.time).and_utc()
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.origin.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(CoreError::ValidationError("origin and destination are required".into()));
        }
        if self.origin.trim().eq_ignore_ascii_case(self.destination.trim()) {
            return Err(CoreError::ValidationError("origin and destination must differ".into()));
        }
        if self.total_seats == 0 {
            return Err(CoreError::ValidationError("total_seats must be positive".into()));
        }
        if self.base_price < 0 {
            return Err(CoreError::ValidationError("base_price cannot be negative".into()));
        }
        if let Some(arrival) = self.arrival {
            if arrival <= self.departure() {
                return Err(CoreError::ValidationError("arrival must be after departure".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FlightRecord {
        serde_json::from_str(
            r#"{
                "flight_id": "7d0c5b0e-3a55-4a77-9a3c-1f2e4c6a8b10",
                "code": "IB3102",
                "origin": "Madrid",
                "destination": "Barcelona",
                "date": "2024-01-15",
                "time": "08:30:00",
                "arrival": null,
                "base_price": 8900,
                "total_seats": 180
            }"#,
        )
        .expect("Failed to deserialize")
    }

    #[test]
    fn test_feed_record_defaults() {
        let rec = record();
        assert_eq!(rec.status, FlightStatus::Scheduled);
        assert_eq!(rec.currency, "EUR");
        assert_eq!(rec.departure().to_rfc3339(), "2024-01-15T08:30:00+00:00");
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_feed_record_validation() {
        let mut rec = record();
        rec.destination = "madrid ".to_string();
        assert!(rec.validate().is_err());

        let mut rec = record();
        rec.total_seats = 0;
        assert!(rec.validate().is_err());

        let mut rec = record();
        rec.base_price = -1;
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(FlightStatus::parse("boarding").unwrap(), FlightStatus::Boarding);
        assert_eq!(FlightStatus::Cancelled.as_str(), "CANCELLED");
        assert!(FlightStatus::parse("DIVERTED").is_err());
    }
}

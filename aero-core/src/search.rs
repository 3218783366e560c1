use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};

use crate::feed::FlightStatus;

/// Results per search page
pub const PAGE_SIZE: usize = 10;

/// Catalog search filter. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchCriteria {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date: Option<NaiveDate>, // Just date, ignore time for search match
    #[serde(default)]
    pub min_seats: Option<u32>,
    /// 1-based
    #[serde(default)]
    pub page: Option<u32>,
    /// Set by the server to the request time, never taken from the query
    #[serde(skip)]
    pub departs_after: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    /// Case-insensitive substring match on the route, exact match on the date.
    pub fn matches(&self, origin: &str, destination: &str, departure: DateTime<Utc>) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            match needle.as_deref().map(str::trim) {
                Some(n) if !n.is_empty() => haystack.to_lowercase().contains(&n.to_lowercase()),
                _ => true,
            }
        }

        contains(origin, &self.origin)
            && contains(destination, &self.destination)
            && self.date.map_or(true, |d| departure.date_naive() == d)
            && self.departs_after.map_or(true, |after| departure >= after)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlightOption {
    pub flight_id: Uuid,
    pub code: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub status: FlightStatus,
    pub price_amount: i64,
    pub price_currency: String,
    pub available_seats: u32,
    pub total_seats: u32,
}

/// One page of an ordered result list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub page: u32,
    pub total_pages: u32,
    pub total_results: usize,
    pub results: Vec<T>,
}

impl<T> SearchPage<T> {
    /// Pages past the end fall back to the last page, page 0 to the first.
    pub fn paginate(items: Vec<T>, page: Option<u32>, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let total_results = items.len();
        let total_pages = total_results.div_ceil(per_page).max(1);
        let page = (page.unwrap_or(1) as usize).clamp(1, total_pages);

        let results = items
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        Self {
            page: page as u32,
            total_pages: total_pages as u32,
            total_results,
            results,
        }
    }
}

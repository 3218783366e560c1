use aero_shared::ReservationEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reservation lifecycle. `Held` is the only state with outgoing transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Held,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Held)
    }

    /// Held or confirmed reservations occupy their passenger's place on the flight.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationState::Held | ReservationState::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Held => "HELD",
            ReservationState::Confirmed => "CONFIRMED",
            ReservationState::Cancelled => "CANCELLED",
            ReservationState::Expired => "EXPIRED",
        }
    }

    /// Whether `self -> next` is a legal edge of the state machine
    pub fn can_transition_to(&self, next: ReservationState) -> bool {
        use ReservationState::*;

        match (*self, next) {
            (Held, Confirmed) | (Held, Cancelled) | (Held, Expired) => true,
            (Held, Held) => false,
            (Confirmed, _) | (Cancelled, _) | (Expired, _) => false,
        }
    }
}

/// The traveller a reservation is made for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passenger {
    pub name: String,
    /// Identity document number; one active reservation per document and flight
    pub document: String,
}

impl Passenger {
    pub fn new(name: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            document: document.into(),
        }
    }

    /// Trimmed name, upper-cased document without inner spaces. `None` if either is blank.
    pub fn normalized(&self) -> Option<Passenger> {
        let name = self.name.trim();
        let document: String = self
            .document
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if name.is_empty() || document.is_empty() {
            return None;
        }
        Some(Passenger::new(name, document))
    }
}

/// Electronic ticket for a confirmed reservation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

/// A seat hold and its outcome. Immutable once terminal, except for ticket issuance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    /// Short code shown to travellers
    pub code: String,
    pub flight_id: Uuid,
    pub seats: u32,
    /// Total price locked in when the hold was placed
    pub price: i64,
    pub currency: String,
    pub passenger: Passenger,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub expiry_deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ticket: Option<Ticket>,
}

impl Reservation {
    pub(crate) fn held(
        flight_id: Uuid,
        seats: u32,
        price: i64,
        currency: String,
        passenger: Passenger,
        created_at: DateTime<Utc>,
        expiry_deadline: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            code: booking_code(&id),
            flight_id,
            seats,
            price,
            currency,
            passenger,
            state: ReservationState::Held,
            created_at,
            expiry_deadline,
            updated_at: created_at,
            ticket: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Held && now >= self.expiry_deadline
    }

    /// Caller must have checked the edge with `can_transition_to`.
    pub(crate) fn apply(&mut self, next: ReservationState) {
        debug_assert!(self.state.can_transition_to(next));
        self.state = next;
        self.updated_at = Utc::now();
    }

    /// Issue the ticket once; later calls return the same ticket.
    /// Caller must have checked the reservation is confirmed.
    pub(crate) fn issue_ticket(&mut self, now: DateTime<Utc>) -> (Ticket, bool) {
        if let Some(ticket) = &self.ticket {
            return (ticket.clone(), false);
        }
        let ticket = Ticket {
            code: format!("TK{}{}", now.timestamp(), self.code),
            issued_at: now,
        };
        self.ticket = Some(ticket.clone());
        self.updated_at = now;
        (ticket, true)
    }

    pub fn to_event(&self) -> ReservationEvent {
        ReservationEvent {
            reservation_id: self.id,
            code: self.code.clone(),
            flight_id: self.flight_id,
            seats: self.seats,
            price: self.price,
            currency: self.currency.clone(),
            passenger_name: self.passenger.name.clone(),
            passenger_document: self.passenger.document.clone(),
            state: self.state.as_str().to_string(),
            created_at: self.created_at,
            expiry_deadline: self.expiry_deadline,
            ticket_code: self.ticket.as_ref().map(|t| t.code.clone()),
            ticket_issued_at: self.ticket.as_ref().map(|t| t.issued_at),
            timestamp: self.updated_at.timestamp(),
        }
    }
}

/// First 8 hex digits of the id, upper-cased
fn booking_code(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_uppercase()
}

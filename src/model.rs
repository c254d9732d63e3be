use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::DayRule;
use crate::lifecycle::ReservationStatus;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A bookable table as the resource catalog reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: Ulid,
    pub label: Option<String>,
    /// Inactive tables are unbookable regardless of calendar or overlap state.
    pub active: bool,
    pub calendar_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub start_at: Ms,
    pub end_at: Ms,
    pub party_size: u32,
    pub is_party: bool,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start_at, self.end_at)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.status.cancel_reason()
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CalendarDefined {
        id: Ulid,
        rules: Vec<DayRule>,
    },
    CalendarRemoved {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        reason: String,
        at: Ms,
    },
    ReservationAmended {
        id: Ulid,
        resource_id: Ulid,
        party_size: u32,
        is_party: bool,
        at: Ms,
    },
}

impl Event {
    /// The resource whose overlap index this event touches, if any.
    pub fn resource_id(&self) -> Option<Ulid> {
        match self {
            Event::ReservationCreated { reservation } => Some(reservation.resource_id),
            Event::ReservationCancelled { resource_id, .. }
            | Event::ReservationAmended { resource_id, .. } => Some(*resource_id),
            Event::CalendarDefined { .. } | Event::CalendarRemoved { .. } => None,
        }
    }

    /// The user whose active slot this event touches, if any.
    pub fn user_id(&self) -> Option<Ulid> {
        match self {
            Event::ReservationCreated { reservation } => Some(reservation.user_id),
            Event::ReservationCancelled { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

// ── Request / query types ────────────────────────────────────────

/// Input to `Engine::create_reservation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub user_id: Ulid,
    pub resource_id: Ulid,
    pub start_at: Ms,
    pub end_at: Ms,
    pub party_size: u32,
    pub is_party: bool,
}

/// Fields mutable after creation. `None` leaves the field as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Amendment {
    pub party_size: Option<u32>,
    pub is_party: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub resource_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub active_only: bool,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.resource_id.is_none_or(|id| id == r.resource_id)
            && self.user_id.is_none_or(|id| id == r.user_id)
            && (!self.active_only || r.is_active())
    }
}

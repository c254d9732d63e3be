//! Reservation state machine.
//!
//! `Active` is the initial state and `Cancelled` is terminal. The cancel
//! reason lives inside the `Cancelled` variant, so a reason without a
//! cancellation (or the reverse) cannot be represented.

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::{Amendment, Ms, Reservation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled { reason: String },
}

impl ReservationStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        match self {
            ReservationStatus::Active => None,
            ReservationStatus::Cancelled { reason } => Some(reason),
        }
    }
}

impl Reservation {
    /// `Active → Cancelled`. The only transition the machine has.
    pub fn cancelled(&self, reason: String, at: Ms) -> Result<Reservation, EngineError> {
        match self.status {
            ReservationStatus::Cancelled { .. } => Err(EngineError::AlreadyCancelled(self.id)),
            ReservationStatus::Active => Ok(Reservation {
                status: ReservationStatus::Cancelled { reason },
                updated_at: at,
                ..self.clone()
            }),
        }
    }

    /// Apply an amendment. Leaves the state untouched; only permitted while active.
    pub fn amended(&self, amendment: Amendment, at: Ms) -> Result<Reservation, EngineError> {
        if !self.is_active() {
            return Err(EngineError::ReservationClosed(self.id));
        }
        let party_size = amendment.party_size.unwrap_or(self.party_size);
        if party_size < 1 {
            return Err(EngineError::InvalidPartySize(party_size));
        }
        Ok(Reservation {
            party_size,
            is_party: amendment.is_party.unwrap_or(self.is_party),
            updated_at: at,
            ..self.clone()
        })
    }
}

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::calendar::{AvailabilityCalendar, DayRule};
use crate::lifecycle::ReservationStatus;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::txn::Transaction;
use super::{Engine, EngineError};

/// Interval sanity first, then hard bounds.
pub(super) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(Span::new(start, end))
}

fn validate_party_size(party_size: u32) -> Result<(), EngineError> {
    if party_size < 1 {
        return Err(EngineError::InvalidPartySize(party_size));
    }
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party size too large"));
    }
    Ok(())
}

impl Engine {
    /// Admit a new reservation. Checks run in a fixed order and the first
    /// failure wins; nothing is written unless every check passes.
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let result = self.admit(req).await;
        match &result {
            Ok(r) => {
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                info!(
                    reservation_id = %r.id,
                    resource_id = %r.resource_id,
                    user_id = %r.user_id,
                    "reservation admitted [{}, {})",
                    r.start_at,
                    r.end_at
                );
            }
            Err(e) => {
                metrics::counter!(observability::ADMISSION_REJECTIONS_TOTAL, "reason" => e.kind())
                    .increment(1);
                debug!(reason = e.kind(), "admission rejected: {e}");
            }
        }
        result
    }

    async fn admit(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let span = validate_interval(req.start_at, req.end_at)?;
        validate_party_size(req.party_size)?;

        let resource = self
            .caps
            .catalog
            .get_resource(req.resource_id)
            .await?
            .ok_or(EngineError::ResourceNotFound(req.resource_id))?;
        if !resource.active {
            return Err(EngineError::ResourceUnavailable(req.resource_id));
        }
        if !self.caps.identity.user_exists(req.user_id).await? {
            return Err(EngineError::UserNotFound(req.user_id));
        }

        let mut txn = Transaction::begin();

        let user = self.lock_user(req.user_id, req.resource_id).await?;
        if let Some(reservation_id) = user.active {
            return Err(EngineError::UserHasActiveReservation {
                user_id: req.user_id,
                reservation_id,
            });
        }
        txn.hold_user(user);

        let uncovered = match self.calendar(resource.calendar_id) {
            Some(calendar) => calendar.uncovered(&span, &self.settings.utc_offset),
            None => {
                warn!(
                    resource_id = %resource.id,
                    calendar_id = %resource.calendar_id,
                    "resource references unknown calendar, treating as closed"
                );
                vec![span]
            }
        };
        if !uncovered.is_empty() {
            return Err(EngineError::ResourceClosedAtRequestedTime {
                resource_id: req.resource_id,
                uncovered,
            });
        }

        let slots = self.lock_resource(req.resource_id).await?;
        if let Some(conflicting) = slots.first_overlap(&span) {
            return Err(EngineError::OverlapConflict {
                resource_id: req.resource_id,
                conflicting: Some(conflicting),
            });
        }
        if slots.len() >= MAX_ACTIVE_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many active reservations on resource"));
        }
        txn.hold_slots(slots);

        let now = self.caps.clock.now();
        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: req.resource_id,
            user_id: req.user_id,
            start_at: span.start,
            end_at: span.end,
            party_size: req.party_size,
            is_party: req.is_party,
            status: ReservationStatus::Active,
            created_at: now,
            updated_at: now,
        };
        txn.stage(Event::ReservationCreated { reservation: reservation.clone() });
        txn.commit(&self.wal, &self.state).await?;
        Ok(reservation)
    }

    /// Cancel an active reservation, freeing its interval.
    pub async fn cancel_reservation(&self, id: Ulid, reason: &str) -> Result<Reservation, EngineError> {
        let current = self.load_reservation(id)?;
        if !current.is_active() {
            return Err(EngineError::AlreadyCancelled(id));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::CancelReasonRequired);
        }
        if reason.len() > MAX_CANCEL_REASON_LEN {
            return Err(EngineError::LimitExceeded("cancel reason too long"));
        }

        let mut txn = Transaction::begin();
        txn.hold_user(self.lock_user(current.user_id, current.resource_id).await?);
        txn.hold_slots(self.lock_resource(current.resource_id).await?);

        // Re-read under the locks: a concurrent cancel may have won.
        let cancelled = self
            .load_reservation(id)?
            .cancelled(reason.to_string(), self.caps.clock.now())?;
        txn.stage(Event::ReservationCancelled {
            id,
            resource_id: cancelled.resource_id,
            user_id: cancelled.user_id,
            reason: reason.to_string(),
            at: cancelled.updated_at,
        });
        txn.commit(&self.wal, &self.state).await?;

        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(reservation_id = %id, resource_id = %cancelled.resource_id, "reservation cancelled");
        Ok(cancelled)
    }

    /// Change party size and/or the party flag of an active reservation.
    /// Interval, resource and user never change.
    pub async fn amend_reservation(&self, id: Ulid, amendment: Amendment) -> Result<Reservation, EngineError> {
        let current = self.load_reservation(id)?;
        if !current.is_active() {
            return Err(EngineError::ReservationClosed(id));
        }
        if let Some(size) = amendment.party_size {
            validate_party_size(size)?;
        }
        if amendment == Amendment::default() {
            return Ok(current);
        }

        let mut txn = Transaction::begin();
        txn.hold_slots(self.lock_resource(current.resource_id).await?);

        let amended = self
            .load_reservation(id)?
            .amended(amendment, self.caps.clock.now())?;
        txn.stage(Event::ReservationAmended {
            id,
            resource_id: amended.resource_id,
            party_size: amended.party_size,
            is_party: amended.is_party,
            at: amended.updated_at,
        });
        txn.commit(&self.wal, &self.state).await?;

        metrics::counter!(observability::RESERVATIONS_AMENDED_TOTAL).increment(1);
        info!(
            reservation_id = %id,
            party_size = amended.party_size,
            is_party = amended.is_party,
            "reservation amended"
        );
        Ok(amended)
    }

    // ── Calendar administration ──────────────────────────────

    /// Validate a full weekly schedule and store it under a new id.
    pub async fn define_calendar(&self, rules: Vec<DayRule>) -> Result<Ulid, EngineError> {
        let _admin = self.calendar_admin.lock().await;
        if self.state.calendars.len() >= MAX_CALENDARS {
            return Err(EngineError::LimitExceeded("too many calendars"));
        }
        let calendar = AvailabilityCalendar::build(rules)?;
        let id = Ulid::new();
        self.commit_calendar(id, &calendar).await?;
        info!(calendar_id = %id, days = calendar.rules().len(), "calendar defined");
        Ok(id)
    }

    /// Swap a calendar for a new weekly schedule in one step.
    pub async fn replace_calendar(&self, id: Ulid, rules: Vec<DayRule>) -> Result<(), EngineError> {
        let _admin = self.calendar_admin.lock().await;
        if !self.state.calendars.contains_key(&id) {
            return Err(EngineError::CalendarNotFound(id));
        }
        let calendar = AvailabilityCalendar::build(rules)?;
        self.commit_calendar(id, &calendar).await?;
        info!(calendar_id = %id, "calendar replaced");
        Ok(())
    }

    pub async fn remove_calendar(&self, id: Ulid) -> Result<(), EngineError> {
        let _admin = self.calendar_admin.lock().await;
        if !self.state.calendars.contains_key(&id) {
            return Err(EngineError::CalendarNotFound(id));
        }
        if self.caps.catalog.calendar_in_use(id).await? {
            return Err(EngineError::CalendarInUse(id));
        }
        let mut txn = Transaction::begin();
        txn.stage(Event::CalendarRemoved { id });
        txn.commit(&self.wal, &self.state).await?;
        info!(calendar_id = %id, "calendar removed");
        Ok(())
    }

    async fn commit_calendar(&self, id: Ulid, calendar: &AvailabilityCalendar) -> Result<(), EngineError> {
        let mut txn = Transaction::begin();
        txn.stage(Event::CalendarDefined { id, rules: calendar.rules() });
        txn.commit(&self.wal, &self.state).await
    }

    fn load_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.state
            .reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::ReservationNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAN_2024: Ms = 1_704_067_200_000;

    #[test]
    fn interval_checks_order() {
        assert!(matches!(validate_interval(JAN_2024, JAN_2024), Err(EngineError::InvalidInterval)));
        assert!(matches!(validate_interval(JAN_2024 + 1, JAN_2024), Err(EngineError::InvalidInterval)));
        // A reversed interval is reported as such even when out of range.
        assert!(matches!(validate_interval(10, 5), Err(EngineError::InvalidInterval)));
        assert!(matches!(validate_interval(0, 5), Err(EngineError::LimitExceeded(_))));
        assert!(matches!(
            validate_interval(JAN_2024, JAN_2024 + MAX_SPAN_DURATION_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
        assert_eq!(
            validate_interval(JAN_2024, JAN_2024 + MAX_SPAN_DURATION_MS).unwrap(),
            Span::new(JAN_2024, JAN_2024 + MAX_SPAN_DURATION_MS)
        );
    }

    #[test]
    fn party_size_bounds() {
        assert!(matches!(validate_party_size(0), Err(EngineError::InvalidPartySize(0))));
        assert!(validate_party_size(1).is_ok());
        assert!(validate_party_size(MAX_PARTY_SIZE).is_ok());
        assert!(matches!(validate_party_size(MAX_PARTY_SIZE + 1), Err(EngineError::LimitExceeded(_))));
    }
}

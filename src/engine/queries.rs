use std::sync::Arc;

use chrono::FixedOffset;
use tracing::warn;
use ulid::Ulid;

use crate::availability::free_windows;
use crate::calendar::{AvailabilityCalendar, DayRule};
use crate::limits::*;
use crate::model::*;

use super::mutations::validate_interval;
use super::{Engine, EngineError};

/// Like `validate_interval`, with the wider query bound in place of the
/// reservation length cap.
fn validate_query_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    match end.checked_sub(start) {
        Some(width) if width <= MAX_QUERY_WINDOW_MS => Ok(Span::new(start, end)),
        _ => Err(EngineError::LimitExceeded("query window too wide")),
    }
}

impl Engine {
    pub(super) fn calendar(&self, id: Ulid) -> Option<Arc<AvailabilityCalendar>> {
        self.state.calendars.get(&id).map(|c| c.value().clone())
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.settings.utc_offset
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        self.state.reservations.get(&id).map(|r| r.value().clone())
    }

    /// Reservations matching `filter`, ordered by start time.
    pub fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .state
            .reservations
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by_key(|r| (r.start_at, r.id));
        out
    }

    /// The single active reservation a user holds, if any.
    pub async fn active_reservation_for_user(&self, user_id: Ulid) -> Option<Reservation> {
        let slot = self.state.users.get(&user_id).map(|s| s.value().clone())?;
        let active = slot.lock().await.active?;
        self.get_reservation(active)
    }

    pub fn get_calendar(&self, id: Ulid) -> Option<Vec<DayRule>> {
        self.calendar(id).map(|c| c.rules())
    }

    /// All calendars as `(id, rules)`, ordered by id.
    pub fn list_calendars(&self) -> Vec<(Ulid, Vec<DayRule>)> {
        let mut out: Vec<(Ulid, Vec<DayRule>)> = self
            .state
            .calendars
            .iter()
            .map(|c| (*c.key(), c.value().rules()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Whether `[start, end)` would collide with an active reservation on
    /// the resource right now. Advisory only; admission re-checks under lock.
    pub async fn would_overlap(&self, resource_id: Ulid, start: Ms, end: Ms) -> Result<bool, EngineError> {
        let span = validate_interval(start, end)?;
        Ok(self.state.index.would_overlap(resource_id, &span).await)
    }

    /// Bookable windows of a table within `[start, end)`: open hours minus
    /// active reservations, sorted and merged.
    pub async fn open_windows(&self, resource_id: Ulid, start: Ms, end: Ms) -> Result<Vec<Span>, EngineError> {
        let query = validate_query_window(start, end)?;

        let resource = self
            .caps
            .catalog
            .get_resource(resource_id)
            .await?
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        if !resource.active {
            return Ok(Vec::new());
        }
        let Some(calendar) = self.calendar(resource.calendar_id) else {
            warn!(
                resource_id = %resource_id,
                calendar_id = %resource.calendar_id,
                "resource references unknown calendar, treating as closed"
            );
            return Ok(Vec::new());
        };

        let open = calendar.open_spans(&query, &self.settings.utc_offset);
        let occupied: Vec<Span> = self
            .state
            .index
            .active_spans(resource_id)
            .await
            .into_iter()
            .filter(|s| s.overlaps(&query))
            .collect();
        Ok(free_windows(&open, &occupied))
    }
}

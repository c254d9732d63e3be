use thiserror::Error;
use ulid::Ulid;

use crate::calendar::CalendarError;
use crate::model::Span;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid interval: start must be before end")]
    InvalidInterval,
    #[error("invalid party size {0}: must be at least 1")]
    InvalidPartySize(u32),
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(Ulid),
    #[error("user not found: {0}")]
    UserNotFound(Ulid),
    #[error("user {user_id} already has active reservation {reservation_id}")]
    UserHasActiveReservation { user_id: Ulid, reservation_id: Ulid },
    #[error("resource {resource_id} is closed during {uncovered:?}")]
    ResourceClosedAtRequestedTime { resource_id: Ulid, uncovered: Vec<Span> },
    /// `conflicting` is `None` when the resource lock could not be acquired in time.
    #[error("overlap conflict on resource {resource_id} (with {conflicting:?})")]
    OverlapConflict {
        resource_id: Ulid,
        conflicting: Option<Ulid>,
    },
    #[error("reservation not found: {0}")]
    ReservationNotFound(Ulid),
    #[error("reservation already cancelled: {0}")]
    AlreadyCancelled(Ulid),
    #[error("reservation is closed: {0}")]
    ReservationClosed(Ulid),
    #[error("a non-empty cancel reason is required")]
    CancelReasonRequired,
    #[error("calendar not found: {0}")]
    CalendarNotFound(Ulid),
    #[error("calendar {0} is still referenced by a resource")]
    CalendarInUse(Ulid),
    #[error("invalid calendar: {0}")]
    InvalidCalendar(#[from] CalendarError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl EngineError {
    /// Whether the caller may retry the same request (possibly after backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::OverlapConflict { .. } | EngineError::StorageUnavailable(_)
        )
    }

    /// Stable short name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval => "invalid_interval",
            EngineError::InvalidPartySize(_) => "invalid_party_size",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::ResourceUnavailable(_) => "resource_unavailable",
            EngineError::UserNotFound(_) => "user_not_found",
            EngineError::UserHasActiveReservation { .. } => "user_has_active_reservation",
            EngineError::ResourceClosedAtRequestedTime { .. } => "resource_closed",
            EngineError::OverlapConflict { .. } => "overlap_conflict",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::AlreadyCancelled(_) => "already_cancelled",
            EngineError::ReservationClosed(_) => "reservation_closed",
            EngineError::CancelReasonRequired => "cancel_reason_required",
            EngineError::CalendarNotFound(_) => "calendar_not_found",
            EngineError::CalendarInUse(_) => "calendar_in_use",
            EngineError::InvalidCalendar(_) => "invalid_calendar",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

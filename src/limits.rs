use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest single reservation: 7 days.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 86_400_000;
/// Widest `open_windows` query: 93 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 93 * 86_400_000;

pub const MAX_PARTY_SIZE: u32 = 1000;
pub const MAX_CANCEL_REASON_LEN: usize = 512;
/// Active reservations held in one table's overlap index.
pub const MAX_ACTIVE_PER_RESOURCE: usize = 10_000;
pub const MAX_CALENDARS: usize = 10_000;

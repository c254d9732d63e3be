//! Recurring weekly open hours for a table.
//!
//! A calendar holds at most one rule per weekday, each with a single
//! time-of-day window measured in seconds since local midnight. Calendars
//! are built whole and never patched: a schedule change replaces the
//! calendar, so a half-applied week is never observable.
//!
//! Local time is derived from the canonical offset the engine is configured
//! with; callers never supply their own wall clock.

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::availability::{free_windows, merge_overlapping};
use crate::model::{Ms, Span};

/// Lowest permitted `start_seconds`. A rule starting here is open from midnight.
pub const MIN_DAY_SECONDS: u32 = 1;
/// Highest permitted `end_seconds` (midnight of the next day).
pub const MAX_DAY_SECONDS: u32 = 86_400;

const DAY_MS: Ms = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WeekDay {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl WeekDay {
    pub const ALL: [WeekDay; 7] = [
        WeekDay::Mon,
        WeekDay::Tue,
        WeekDay::Wed,
        WeekDay::Thu,
        WeekDay::Fri,
        WeekDay::Sat,
        WeekDay::Sun,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl From<chrono::Weekday> for WeekDay {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => WeekDay::Mon,
            chrono::Weekday::Tue => WeekDay::Tue,
            chrono::Weekday::Wed => WeekDay::Wed,
            chrono::Weekday::Thu => WeekDay::Thu,
            chrono::Weekday::Fri => WeekDay::Fri,
            chrono::Weekday::Sat => WeekDay::Sat,
            chrono::Weekday::Sun => WeekDay::Sun,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("more than one rule for {0:?}")]
    DuplicateWeekday(WeekDay),
    #[error("invalid range for {weekday:?}: [{start_seconds}, {end_seconds}) must satisfy 1 <= start < end <= 86400")]
    InvalidRange {
        weekday: WeekDay,
        start_seconds: u32,
        end_seconds: u32,
    },
}

/// One contiguous open window within a day, `[start_seconds, end_seconds)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayRange {
    pub start_seconds: u32,
    pub end_seconds: u32,
}

impl TimeOfDayRange {
    pub fn new(start_seconds: u32, end_seconds: u32) -> Self {
        Self { start_seconds, end_seconds }
    }

    /// The whole day.
    pub fn all_day() -> Self {
        Self::new(MIN_DAY_SECONDS, MAX_DAY_SECONDS)
    }

    fn is_valid(&self) -> bool {
        MIN_DAY_SECONDS <= self.start_seconds
            && self.end_seconds <= MAX_DAY_SECONDS
            && self.start_seconds < self.end_seconds
    }

    fn opens_at_ms(&self) -> Ms {
        if self.start_seconds == MIN_DAY_SECONDS {
            0
        } else {
            Ms::from(self.start_seconds) * 1000
        }
    }

    fn closes_at_ms(&self) -> Ms {
        Ms::from(self.end_seconds) * 1000
    }

    fn contains_ms_of_day(&self, ms: Ms) -> bool {
        self.opens_at_ms() <= ms && ms < self.closes_at_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRule {
    pub weekday: WeekDay,
    /// A disabled rule closes the day regardless of its range.
    pub enabled: bool,
    pub range: TimeOfDayRange,
}

impl DayRule {
    pub fn open(weekday: WeekDay, start_seconds: u32, end_seconds: u32) -> Self {
        Self {
            weekday,
            enabled: true,
            range: TimeOfDayRange::new(start_seconds, end_seconds),
        }
    }

    pub fn closed(weekday: WeekDay) -> Self {
        Self {
            weekday,
            enabled: false,
            range: TimeOfDayRange::all_day(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AvailabilityCalendar {
    days: [Option<DayRule>; 7],
}

impl AvailabilityCalendar {
    /// Build a calendar from a full weekly schedule. All-or-nothing.
    pub fn build(rules: impl IntoIterator<Item = DayRule>) -> Result<Self, CalendarError> {
        let mut days: [Option<DayRule>; 7] = [None; 7];
        for rule in rules {
            if !rule.range.is_valid() {
                return Err(CalendarError::InvalidRange {
                    weekday: rule.weekday,
                    start_seconds: rule.range.start_seconds,
                    end_seconds: rule.range.end_seconds,
                });
            }
            let slot = &mut days[rule.weekday.index()];
            if slot.is_some() {
                return Err(CalendarError::DuplicateWeekday(rule.weekday));
            }
            *slot = Some(rule);
        }
        Ok(Self { days })
    }

    pub fn rule_for(&self, weekday: WeekDay) -> Option<&DayRule> {
        self.days[weekday.index()].as_ref()
    }

    /// Rules in weekday order, as they would be passed back to `build`.
    pub fn rules(&self) -> Vec<DayRule> {
        self.days.iter().flatten().copied().collect()
    }

    fn open_range(&self, weekday: WeekDay) -> Option<&TimeOfDayRange> {
        self.rule_for(weekday)
            .filter(|rule| rule.enabled)
            .map(|rule| &rule.range)
    }

    /// True iff the day of `at` has an enabled rule whose range contains
    /// the time of day of `at`. Closing instants are closed.
    pub fn is_open_at(&self, at: Ms, tz: &FixedOffset) -> bool {
        let Some((weekday, ms_of_day)) = local_day_position(at, tz) else {
            return false;
        };
        self.open_range(weekday)
            .is_some_and(|range| range.contains_ms_of_day(ms_of_day))
    }

    /// Open windows intersecting `query`, clamped to it, sorted and merged.
    /// Windows that meet at midnight come back as one span.
    pub fn open_spans(&self, query: &Span, tz: &FixedOffset) -> Vec<Span> {
        let mut open = Vec::new();
        let mut cursor = query.start;
        while cursor < query.end {
            let Some((weekday, ms_of_day)) = local_day_position(cursor, tz) else {
                break;
            };
            let day_start = cursor - ms_of_day;
            if let Some(range) = self.open_range(weekday) {
                let start = (day_start + range.opens_at_ms()).max(query.start);
                let end = (day_start + range.closes_at_ms()).min(query.end);
                if start < end {
                    open.push(Span::new(start, end));
                }
            }
            cursor = day_start + DAY_MS;
        }
        merge_overlapping(&open)
    }

    /// Parts of `span` that fall outside open hours. Every day the span
    /// touches is checked against its own rule.
    pub fn uncovered(&self, span: &Span, tz: &FixedOffset) -> Vec<Span> {
        let open = self.open_spans(span, tz);
        free_windows(&[*span], &open)
    }

    pub fn covers(&self, span: &Span, tz: &FixedOffset) -> bool {
        self.uncovered(span, tz).is_empty()
    }
}

/// Weekday and milliseconds since local midnight for an instant.
fn local_day_position(at: Ms, tz: &FixedOffset) -> Option<(WeekDay, Ms)> {
    let local = DateTime::from_timestamp_millis(at)?.with_timezone(tz);
    let ms_of_day = Ms::from(local.num_seconds_from_midnight()) * 1000
        + Ms::from(local.timestamp_subsec_millis());
    Some((local.weekday().into(), ms_of_day))
}

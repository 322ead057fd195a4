//! Event types shared across the sync engine.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Years outside this range mark a value that was never a real event
/// timestamp (stray VTIMEZONE artifacts and the like).
pub const YEAR_MIN: i32 = 1900;
pub const YEAR_MAX: i32 = 2100;

/// Whether a year can belong to a real event timestamp.
pub fn year_in_range(year: i32) -> bool {
    (YEAR_MIN..=YEAR_MAX).contains(&year)
}

/// Which producer a calendar event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSourceKind {
    /// The subscribed iCal feed
    Feed,
    /// A CalDAV server (discovery + range query)
    CalDav,
    /// Google Calendar (OAuth session)
    Google,
}

impl EventSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSourceKind::Feed => "feed",
            EventSourceKind::CalDav => "caldav",
            EventSourceKind::Google => "google",
        }
    }
}

/// Event time - a date-only value, a zone-less local date-time, or a
/// UTC-anchored instant.
///
/// Feeds encode all three: `20250101` (all-day), `20250915T030000` (floating,
/// interpreted as the viewer's wall clock), `20250915T030000Z` (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    Date(NaiveDate),
    Floating(NaiveDateTime),
    Utc(DateTime<Utc>),
}

impl EventTime {
    /// Zone-agnostic key for ordering events by start time.
    ///
    /// Dates sort at their midnight; UTC instants by their UTC wall clock.
    pub fn sort_key(&self) -> NaiveDateTime {
        match self {
            EventTime::Date(d) => d.and_time(NaiveTime::MIN),
            EventTime::Floating(dt) => *dt,
            EventTime::Utc(dt) => dt.naive_utc(),
        }
    }

    /// Calendar year of this time value.
    pub fn year(&self) -> i32 {
        use chrono::Datelike;
        match self {
            EventTime::Date(d) => d.year(),
            EventTime::Floating(dt) => dt.date().year(),
            EventTime::Utc(dt) => dt.date_naive().year(),
        }
    }

    /// Calendar date of this time value as seen by a viewer in `tz`.
    ///
    /// Date-only and floating values already carry the viewer's wall clock;
    /// only UTC instants need conversion.
    pub fn local_date<Tz: TimeZone>(&self, tz: &Tz) -> NaiveDate {
        match self {
            EventTime::Date(d) => *d,
            EventTime::Floating(dt) => dt.date(),
            EventTime::Utc(dt) => dt.with_timezone(tz).date_naive(),
        }
    }

    /// Wall-clock time of day as seen by a viewer in `tz`, or None for
    /// date-only values.
    pub fn local_time<Tz: TimeZone>(&self, tz: &Tz) -> Option<NaiveTime> {
        match self {
            EventTime::Date(_) => None,
            EventTime::Floating(dt) => Some(dt.time()),
            EventTime::Utc(dt) => Some(dt.with_timezone(tz).time()),
        }
    }
}

/// Calendar event as delivered to observers. Immutable value type; consumers
/// only ever hold clones, never a handle back into the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Unique id within a source feed (UID)
    pub id: String,
    pub title: String,
    pub start: EventTime,
    pub end: EventTime,
    /// True when the source encoded date-only values
    pub all_day: bool,
    pub description: Option<String>,
    pub location: Option<String>,
    pub source: EventSourceKind,
}

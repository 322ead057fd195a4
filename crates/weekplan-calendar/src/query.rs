//! Pure queries over event lists: day-level filtering and display formatting.
//!
//! Comparisons use the viewer's timezone, never the feed's origin zone. Pass
//! a `chrono_tz::Tz` (or any `TimeZone`) matching where the planner is being
//! viewed.

use chrono::{NaiveDate, TimeZone};

use crate::types::{year_in_range, CalendarEvent, EventTime};

/// Display path refuses events older than this; anything earlier is a relic
/// of a mis-parsed feed rather than something worth putting on a planner.
pub const DISPLAY_MIN_YEAR: i32 = 2020;

/// Events whose start falls on `date` in the viewer's timezone.
///
/// Events with out-of-range or pre-2020 years are excluded, never an error.
pub fn events_for_day<Tz: TimeZone>(
    events: &[CalendarEvent],
    date: NaiveDate,
    tz: &Tz,
) -> Vec<CalendarEvent> {
    events
        .iter()
        .filter(|event| {
            let start_year = event.start.year();
            let end_year = event.end.year();

            if !year_in_range(start_year) || !year_in_range(end_year) {
                tracing::warn!(id = %event.id, start_year, end_year, "skipping event with invalid dates");
                return false;
            }
            if start_year < DISPLAY_MIN_YEAR || end_year < DISPLAY_MIN_YEAR {
                tracing::debug!(id = %event.id, start_year, "skipping stale event");
                return false;
            }

            // An event shows only on the day it starts
            event.start.local_date(tz) == date
        })
        .cloned()
        .collect()
}

/// Human-readable line for the weekly planner.
///
/// All-day events render as `"{title} (All Day)"`; timed events show start
/// and end in the viewer's timezone with a zone abbreviation.
pub fn format_for_display<Tz: TimeZone>(event: &CalendarEvent, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if event.all_day {
        return format!("{} (All Day)", event.title);
    }

    format!(
        "{} ({}\u{2013}{})",
        event.title,
        format_time(&event.start, tz),
        format_time(&event.end, tz)
    )
}

fn format_time<Tz: TimeZone>(time: &EventTime, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match time {
        EventTime::Utc(dt) => dt.with_timezone(tz).format("%H:%M %Z").to_string(),
        EventTime::Floating(naive) => {
            // Floating values already carry the viewer's wall clock; attach
            // the zone so both renderings read the same
            match tz.from_local_datetime(naive).single() {
                Some(dt) => dt.format("%H:%M %Z").to_string(),
                None => naive.format("%H:%M").to_string(),
            }
        }
        EventTime::Date(_) => String::new(),
    }
}

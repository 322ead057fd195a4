//! Feed parser: raw iCal text into [`CalendarEvent`] records.
//!
//! Tolerant by design: a malformed block is dropped and parsing continues.
//! The scan is order-insensitive within a block and the first occurrence of
//! a field wins, which is what the format allows.

use chrono::{NaiveDate, NaiveDateTime};

use crate::types::{year_in_range, CalendarEvent, EventSourceKind, EventTime};

const EVENT_BEGIN: &str = "BEGIN:VEVENT";

/// Parse a raw feed into events, sorted ascending by start time.
///
/// `week_start` identifies the requested window for cache keying; no week
/// filtering happens here - day filtering belongs to [`crate::query`].
pub fn parse(raw: &str, week_start: NaiveDate) -> Vec<CalendarEvent> {
    let mut blocks = raw.split(EVENT_BEGIN);
    // The first fragment is the document preamble (PRODID, VTIMEZONE blocks)
    blocks.next();

    let mut events: Vec<CalendarEvent> = blocks.filter_map(parse_block).collect();
    events.sort_by_key(|e| e.start.sort_key());

    tracing::debug!(
        week = %week_start,
        count = events.len(),
        "parsed calendar feed"
    );
    events
}

/// One unfolded `NAME;PARAM=...:VALUE` content line.
///
/// Parameter annotations (`;VALUE=DATE`, `;TZID=...`) are skipped so the bare
/// value stays readable.
struct ContentLine<'a> {
    name: &'a str,
    value: &'a str,
}

impl<'a> ContentLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let colon = line.find(':')?;
        let head = &line[..colon];
        let name = head.split(';').next().unwrap_or(head);
        Some(Self {
            name,
            value: line[colon + 1..].trim(),
        })
    }
}

/// Parse one candidate event block, or None when it must be dropped.
fn parse_block(block: &str) -> Option<CalendarEvent> {
    let mut title: Option<String> = None;
    let mut start: Option<EventTime> = None;
    let mut end: Option<EventTime> = None;
    let mut all_day = false;
    let mut description: Option<String> = None;
    let mut location: Option<String> = None;
    let mut id: Option<String> = None;

    for raw_line in block.lines() {
        let Some(line) = ContentLine::parse(raw_line.trim()) else {
            continue;
        };

        match line.name {
            "SUMMARY" if title.is_none() => title = Some(unescape_text(line.value)),
            "DTSTART" if start.is_none() => {
                // A bad date poisons the whole block, not just this field
                let (time, is_date_only) = match parse_date_value(line.value) {
                    Ok(parsed) => parsed,
                    Err(reason) => {
                        tracing::debug!(value = line.value, %reason, "dropping event block");
                        return None;
                    }
                };
                all_day = is_date_only;
                start = Some(time);
            }
            "DTEND" if end.is_none() => {
                let (time, _) = match parse_date_value(line.value) {
                    Ok(parsed) => parsed,
                    Err(reason) => {
                        tracing::debug!(value = line.value, %reason, "dropping event block");
                        return None;
                    }
                };
                end = Some(time);
            }
            "DESCRIPTION" if description.is_none() => {
                description = Some(unescape_text(line.value))
            }
            "LOCATION" if location.is_none() => location = Some(unescape_text(line.value)),
            "UID" if id.is_none() => id = Some(line.value.to_string()),
            _ => {}
        }
    }

    let (title, start, end, id) = match (title, start, end, id) {
        (Some(t), Some(s), Some(e), Some(i)) => (t, s, e, i),
        _ => {
            tracing::debug!("dropping event block missing a required field");
            return None;
        }
    };

    if start.sort_key() > end.sort_key() {
        tracing::debug!(uid = %id, "dropping event block with start after end");
        return None;
    }

    Some(CalendarEvent {
        id,
        title,
        start,
        end,
        all_day,
        description,
        location,
        source: EventSourceKind::Feed,
    })
}

/// Reason a date value was rejected.
#[derive(Debug, PartialEq, Eq)]
enum DateError {
    UnsupportedFormat(usize),
    YearOutOfRange(i32),
    Unparseable,
}

impl std::fmt::Display for DateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateError::UnsupportedFormat(len) => write!(f, "unsupported date length {}", len),
            DateError::YearOutOfRange(year) => write!(f, "year {} out of range", year),
            DateError::Unparseable => write!(f, "unparseable date value"),
        }
    }
}

/// Parse a date-valued field. Returns the time and whether it was date-only.
///
/// Supported encodings: `YYYYMMDD` (all-day), `YYYYMMDDThhmmss` (floating
/// local time) and `YYYYMMDDThhmmssZ` (UTC).
fn parse_date_value(value: &str) -> Result<(EventTime, bool), DateError> {
    use chrono::Datelike;

    match value.len() {
        8 => {
            let date = NaiveDate::parse_from_str(value, "%Y%m%d")
                .map_err(|_| DateError::Unparseable)?;
            check_year(date.year())?;
            Ok((EventTime::Date(date), true))
        }
        15 => {
            let dt = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
                .map_err(|_| DateError::Unparseable)?;
            check_year(dt.date().year())?;
            Ok((EventTime::Floating(dt), false))
        }
        16 if value.ends_with('Z') => {
            let dt = NaiveDateTime::parse_from_str(&value[..15], "%Y%m%dT%H%M%S")
                .map_err(|_| DateError::Unparseable)?;
            check_year(dt.date().year())?;
            Ok((EventTime::Utc(dt.and_utc()), false))
        }
        other => Err(DateError::UnsupportedFormat(other)),
    }
}

fn check_year(year: i32) -> Result<(), DateError> {
    if year_in_range(year) {
        Ok(())
    } else {
        Err(DateError::YearOutOfRange(year))
    }
}

/// Undo the escaping the format applies to text fields.
fn unescape_text(value: &str) -> String {
    value.replace("\\,", ",").replace("\\;", ";")
}

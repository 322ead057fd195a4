//! Calendar synchronization engine for WeekPlan.
//!
//! Fetches a subscription feed (iCal over HTTP), parses it into
//! [`CalendarEvent`] records, memoizes results per week in [`EventCache`],
//! and keeps them fresh with per-configuration background timers driven by
//! [`SyncScheduler`]. Secondary sources (CalDAV, Google Calendar) plug in
//! through the [`sources::EventSource`] trait and contribute to the same
//! event stream.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod parser;
pub mod query;
pub mod sources;
pub mod sync;
pub mod types;

pub use cache::{CacheKey, EventCache};
pub use error::CalendarError;
pub use fetch::{FeedFetcher, RetrievalRoute};
pub use query::{events_for_day, format_for_display};
pub use sync::{ObserverCallback, SyncKey, SyncScheduler, SyncStatus};
pub use types::{CalendarEvent, EventSourceKind, EventTime};
pub use weekplan_core::SyncFrequency;

//! Secondary event sources.
//!
//! Adapters producing the same [`CalendarEvent`] shape as the subscription
//! feed, merged into the stream by the scheduler.

pub mod caldav;
pub mod google;

pub use caldav::CalDavSource;
pub use google::GoogleCalendarSource;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::CalendarError;
use crate::types::{CalendarEvent, EventSourceKind};

/// A producer of calendar events for a week window.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn kind(&self) -> EventSourceKind;

    /// Whether the source can be queried right now (credentials present,
    /// session established). A source that is not ready contributes an empty
    /// list for the cycle instead of failing it.
    fn is_ready(&self) -> bool;

    /// Events starting within the week beginning at `week_start`.
    async fn events_for_week(
        &self,
        week_start: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;
}

//! Google Calendar secondary source.
//!
//! Requires an OAuth session established out-of-band (see `weekplan-auth`).
//! Without one it contributes an empty list rather than failing the cycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use weekplan_auth::SessionStore;

use crate::error::CalendarError;
use crate::sources::EventSource;
use crate::types::{CalendarEvent, EventSourceKind, EventTime};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

pub struct GoogleCalendarSource {
    client: reqwest::Client,
    session: Arc<SessionStore>,
    base_url: String,
}

impl GoogleCalendarSource {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            session,
            base_url: CALENDAR_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub fn new_with_base_url(session: Arc<SessionStore>, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            session,
            base_url: base_url.to_string(),
        }
    }

    async fn list_week(
        &self,
        token: &str,
        week_start: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let time_min = week_start.and_time(NaiveTime::MIN).and_utc();
        let time_max = time_min + chrono::Duration::days(7);

        let url = format!(
            "{}/calendars/primary/events?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime&maxResults=250",
            self.base_url,
            urlencoding::encode(&time_min.to_rfc3339()),
            urlencoding::encode(&time_max.to_rfc3339()),
        );

        let response = self.client.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CalendarError::AuthRequired);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CalendarError::ApiError(format!("{}: {}", status, text)));
        }

        let list: EventListResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::InvalidResponse(e.to_string()))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(ApiEvent::into_event)
            .collect())
    }
}

#[async_trait]
impl EventSource for GoogleCalendarSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::Google
    }

    fn is_ready(&self) -> bool {
        self.session.is_authenticated()
    }

    #[tracing::instrument(skip(self), level = "info")]
    async fn events_for_week(
        &self,
        week_start: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let Some(token) = self.session.access_token() else {
            tracing::debug!("no Google session, contributing no events");
            return Ok(Vec::new());
        };

        let events = self.list_week(&token, week_start).await?;
        tracing::info!(count = events.len(), "fetched Google Calendar events");
        Ok(events)
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date_time: Option<String>,
    date: Option<String>,
}

impl ApiEventTime {
    fn parse(&self) -> Option<(EventTime, bool)> {
        if let Some(dt_str) = &self.date_time {
            if let Ok(dt) = DateTime::parse_from_rfc3339(dt_str) {
                return Some((EventTime::Utc(dt.with_timezone(&Utc)), false));
            }
        }
        if let Some(date_str) = &self.date {
            if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                return Some((EventTime::Date(date), true));
            }
        }
        None
    }
}

impl ApiEvent {
    /// Convert an API event, or None when its times are unusable.
    fn into_event(self) -> Option<CalendarEvent> {
        let (start, all_day) = self.start.as_ref().and_then(ApiEventTime::parse)?;
        let end = match self.end.as_ref().and_then(ApiEventTime::parse) {
            Some((end, _)) if end.sort_key() >= start.sort_key() => end,
            // Zero-length fallback keeps the start<=end invariant
            _ => start.clone(),
        };

        Some(CalendarEvent {
            id: self.id,
            title: self.summary.unwrap_or_else(|| "No Title".to_string()),
            start,
            end,
            all_day,
            description: self.description,
            location: self.location,
            source: EventSourceKind::Google,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use weekplan_auth::TokenSet;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signed_in_store() -> Arc<SessionStore> {
        let store = SessionStore::new();
        store.set(TokenSet {
            access_token: "test_token".to_string(),
            refresh_token: None,
            expires_at: chrono::Utc::now().timestamp() + 3600,
            scopes: vec![],
        });
        Arc::new(store)
    }

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 15).unwrap()
    }

    #[tokio::test]
    async fn test_no_session_yields_empty_without_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let source =
            GoogleCalendarSource::new_with_base_url(Arc::new(SessionStore::new()), &server.uri());
        assert!(!source.is_ready());

        let events = source.events_for_week(week()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_maps_api_events() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {
                        "id": "g1",
                        "summary": "Team Meeting",
                        "location": "Room A",
                        "start": {"dateTime": "2025-09-16T10:00:00Z"},
                        "end": {"dateTime": "2025-09-16T11:00:00Z"}
                    },
                    {
                        "id": "g2",
                        "summary": "Holiday",
                        "start": {"date": "2025-09-17"},
                        "end": {"date": "2025-09-18"}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let source = GoogleCalendarSource::new_with_base_url(signed_in_store(), &server.uri());
        let events = source.events_for_week(week()).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "g1");
        assert_eq!(events[0].source, EventSourceKind::Google);
        assert!(!events[0].all_day);
        assert_eq!(events[0].location.as_deref(), Some("Room A"));
        assert!(events[1].all_day);
        assert_eq!(
            events[1].start,
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 9, 17).unwrap())
        );
    }

    #[tokio::test]
    async fn test_expired_token_maps_to_auth_required() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let source = GoogleCalendarSource::new_with_base_url(signed_in_store(), &server.uri());
        let result = source.events_for_week(week()).await;
        assert!(matches!(result, Err(CalendarError::AuthRequired)));
    }

    #[test]
    fn test_event_without_start_is_skipped() {
        let api = ApiEvent {
            id: "g3".to_string(),
            summary: Some("Broken".to_string()),
            description: None,
            location: None,
            start: None,
            end: None,
        };
        assert!(api.into_event().is_none());
    }
}

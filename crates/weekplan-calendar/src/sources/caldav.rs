//! CalDAV secondary source.
//!
//! Two-step exchange with basic credentials: discover the calendar
//! collections (principal, then home set, then calendars), then run a
//! calendar-query REPORT against each for the week range. Returned
//! calendar-data goes through the regular feed parser.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use minidom::Element;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use url::Url;

use crate::error::CalendarError;
use crate::parser;
use crate::sources::EventSource;
use crate::types::{CalendarEvent, EventSourceKind};

static DAVCLIENT_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:">
       <d:prop>
           <d:current-user-principal />
       </d:prop>
    </d:propfind>
"#;

static HOMESET_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" >
      <d:self/>
      <d:prop>
        <c:calendar-home-set />
      </d:prop>
    </d:propfind>
"#;

static CAL_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" >
       <d:prop>
         <d:displayname />
         <d:resourcetype />
       </d:prop>
    </d:propfind>
"#;

/// calendar-query REPORT for events within [start, end), both UTC.
fn events_body(start: &str, end: &str) -> String {
    format!(
        r#"
    <C:calendar-query xmlns:C="urn:ietf:params:xml:ns:caldav">
    <D:prop xmlns:D="DAV:">
        <D:getetag/>
        <C:calendar-data/>
    </D:prop>
    <C:filter>
        <C:comp-filter name="VCALENDAR">
        <C:comp-filter name="VEVENT">
            <C:time-range start="{}" end="{}"/>
        </C:comp-filter>
        </C:comp-filter>
    </C:filter>
    </C:calendar-query>
"#,
        start, end
    )
}

/// Walks an XML tree until it finds an element with the given name
fn find_elem<'a>(root: &'a Element, searched_name: &str) -> Option<&'a Element> {
    if root.name() == searched_name {
        return Some(root);
    }
    for el in root.children() {
        if let Some(found) = find_elem(el, searched_name) {
            return Some(found);
        }
    }
    None
}

/// Walks an XML tree and returns every element that has the given name
fn find_elems<'a>(root: &'a Element, searched_name: &str) -> Vec<&'a Element> {
    let mut elems = Vec::new();
    for el in root.children() {
        if el.name() == searched_name {
            elems.push(el);
        } else {
            elems.extend(find_elems(el, searched_name));
        }
    }
    elems
}

/// A secondary source backed by a CalDAV server.
pub struct CalDavSource {
    url: Url,
    username: String,
    password: String,
    client: reqwest::Client,
    home_set: RwLock<Option<Url>>,
}

impl CalDavSource {
    /// Create a source. This does not start a connection.
    pub fn new<S: AsRef<str>>(
        url: S,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CalendarError> {
        let url = Url::parse(url.as_ref())?;

        Ok(Self {
            url,
            username: username.into(),
            password: password.into(),
            client: reqwest::Client::new(),
            home_set: RwLock::new(None),
        })
    }

    async fn dav_request(
        &self,
        url: &Url,
        method_name: &str,
        depth: u32,
        body: String,
    ) -> Result<String, CalendarError> {
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|e| CalendarError::ApiError(e.to_string()))?;

        let res = self
            .client
            .request(method, url.as_str())
            .header("Depth", depth)
            .header(CONTENT_TYPE, "application/xml")
            .basic_auth(&self.username, Some(&self.password))
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CalendarError::AuthRequired);
        }
        if !status.is_success() {
            return Err(CalendarError::ApiError(format!("{} {}", method_name, status)));
        }

        Ok(res.text().await?)
    }

    fn parse_xml(text: &str) -> Result<Element, CalendarError> {
        text.parse()
            .map_err(|e: minidom::Error| CalendarError::InvalidResponse(e.to_string()))
    }

    /// PROPFIND at depth 0 and walk down to one href, resolved against the
    /// configured server.
    async fn fetch_href(
        &self,
        url: &Url,
        body: &str,
        names: &[&str],
    ) -> Result<Url, CalendarError> {
        let text = self.dav_request(url, "PROPFIND", 0, body.to_string()).await?;
        let root = Self::parse_xml(&text)?;

        let mut el = &root;
        for name in names {
            el = find_elem(el, name).ok_or_else(|| {
                CalendarError::InvalidResponse(format!("missing <{}> in response", name))
            })?;
        }

        let mut resolved = self.url.clone();
        resolved.set_path(&el.text());
        Ok(resolved)
    }

    async fn principal(&self) -> Result<Url, CalendarError> {
        let principal = self
            .fetch_href(&self.url, DAVCLIENT_BODY, &["current-user-principal", "href"])
            .await?;
        tracing::debug!(url = %principal.path(), "principal URL");
        Ok(principal)
    }

    /// Return the calendar home set URL, or fetch it from server if not
    /// known yet
    async fn calendar_home_set(&self) -> Result<Url, CalendarError> {
        if let Some(home) = self.home_set.read().clone() {
            return Ok(home);
        }

        let principal = self.principal().await?;
        let home = self
            .fetch_href(&principal, HOMESET_BODY, &["calendar-home-set", "href"])
            .await?;
        tracing::debug!(url = %home.path(), "calendar home set URL");

        *self.home_set.write() = Some(home.clone());
        Ok(home)
    }

    /// List the calendar collections available to these credentials.
    pub async fn discover_calendars(&self) -> Result<Vec<Url>, CalendarError> {
        let home = self.calendar_home_set().await?;
        let text = self.dav_request(&home, "PROPFIND", 1, CAL_BODY.to_string()).await?;
        let root = Self::parse_xml(&text)?;

        let mut calendars = Vec::new();
        for response in find_elems(&root, "response") {
            // Filter out non-calendar collections
            let Some(resource_types) = find_elem(response, "resourcetype") else {
                continue;
            };
            if !resource_types.children().any(|c| c.name() == "calendar") {
                continue;
            }

            let Some(href) = find_elem(response, "href") else {
                tracing::warn!("calendar collection without an href, ignoring");
                continue;
            };

            let mut calendar_url = self.url.clone();
            calendar_url.set_path(&href.text());
            tracing::info!(url = %calendar_url.path(), "found calendar");
            calendars.push(calendar_url);
        }

        Ok(calendars)
    }

    /// Events in one calendar for the week beginning at `week_start`.
    async fn query_events(
        &self,
        calendar: &Url,
        week_start: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let range_start = week_start.and_time(NaiveTime::MIN).and_utc();
        let range_end = range_start + Duration::days(7);
        let body = events_body(
            &range_start.format("%Y%m%dT%H%M%SZ").to_string(),
            &range_end.format("%Y%m%dT%H%M%SZ").to_string(),
        );

        let text = self.dav_request(calendar, "REPORT", 1, body).await?;
        let root = Self::parse_xml(&text)?;

        let mut events = Vec::new();
        for data in find_elems(&root, "calendar-data") {
            events.extend(parser::parse(&data.text(), week_start).into_iter().map(
                |mut event| {
                    event.source = EventSourceKind::CalDav;
                    event
                },
            ));
        }
        Ok(events)
    }
}

#[async_trait]
impl EventSource for CalDavSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::CalDav
    }

    fn is_ready(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    #[tracing::instrument(skip(self), level = "info")]
    async fn events_for_week(
        &self,
        week_start: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let mut events = Vec::new();
        for calendar in self.discover_calendars().await? {
            events.extend(self.query_events(&calendar, week_start).await?);
        }
        events.sort_by_key(|e| e.start.sort_key());
        Ok(events)
    }
}

//! Feed retrieval over an ordered list of relay routes.
//!
//! Subscription feeds are often served from hosts that block direct access,
//! so retrieval goes through the first-party relay first and falls back to
//! public pass-through relays in fixed priority order. The first route that
//! yields a body that actually looks like calendar data wins.

use std::time::Duration;

use reqwest::header::ACCEPT;
use url::Url;

use crate::error::{CalendarError, RouteFailure};

const FEED_ACCEPT: &str = "text/calendar, */*";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// First-party relay endpoint, always tried first.
const RELAY_ENDPOINT: &str = "https://app.weekplan.dev/api/calendar/proxy?url=";

/// One entry in the ordered relay list.
#[derive(Debug, Clone)]
pub struct RetrievalRoute {
    pub name: String,
    prefix: String,
    encode_target: bool,
}

impl RetrievalRoute {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, encode_target: bool) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            encode_target,
        }
    }

    /// Request URL for retrieving `target` through this route.
    fn request_url(&self, target: &str) -> String {
        if self.encode_target {
            format!("{}{}", self.prefix, urlencoding::encode(target))
        } else {
            format!("{}{}", self.prefix, target)
        }
    }
}

fn default_routes() -> Vec<RetrievalRoute> {
    vec![
        RetrievalRoute::new("relay", RELAY_ENDPOINT, true),
        RetrievalRoute::new("corsproxy", "https://corsproxy.io/?", true),
        RetrievalRoute::new("allorigins", "https://api.allorigins.win/raw?url=", true),
        RetrievalRoute::new("cors-anywhere", "https://cors-anywhere.herokuapp.com/", false),
    ]
}

/// Retrieves raw feed text for a URL.
pub struct FeedFetcher {
    client: reqwest::Client,
    routes: Vec<RetrievalRoute>,
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedFetcher {
    pub fn new() -> Self {
        Self::with_routes(default_routes())
    }

    /// Build a fetcher over a custom route list (tests, self-hosted relays).
    pub fn with_routes(routes: Vec<RetrievalRoute>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, routes }
    }

    /// Rewrite `webcal://` to `https://` and validate the URL.
    pub fn normalize_feed_url(feed_url: &str) -> Result<String, CalendarError> {
        let rewritten = match feed_url.strip_prefix("webcal://") {
            Some(rest) => format!("https://{}", rest),
            None => feed_url.to_string(),
        };
        Url::parse(&rewritten)?;
        Ok(rewritten)
    }

    /// Retrieve the raw feed body, trying each route in order.
    ///
    /// Exhausting every route is a soft failure for callers: the returned
    /// error aggregates each route's reason for diagnostics.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn fetch(&self, feed_url: &str) -> Result<String, CalendarError> {
        let target = Self::normalize_feed_url(feed_url)?;

        let mut failures = Vec::new();
        for route in &self.routes {
            let request_url = route.request_url(&target);
            tracing::debug!(route = %route.name, "trying retrieval route");

            match self.try_route(&request_url).await {
                Ok(body) => {
                    tracing::info!(route = %route.name, bytes = body.len(), "feed retrieved");
                    return Ok(body);
                }
                Err(reason) => {
                    tracing::warn!(route = %route.name, %reason, "retrieval route failed");
                    failures.push(RouteFailure {
                        route: route.name.clone(),
                        reason,
                    });
                }
            }
        }

        Err(CalendarError::FeedUnavailable { failures })
    }

    async fn try_route(&self, request_url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(request_url)
            .header(ACCEPT, FEED_ACCEPT)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let body = response.text().await.map_err(|e| e.to_string())?;

        // Relays sometimes return their own HTML error page with a 200
        if !looks_like_calendar(&body) {
            return Err("response body is not calendar data".to_string());
        }

        Ok(body)
    }
}

fn looks_like_calendar(body: &str) -> bool {
    body.contains("BEGIN:VCALENDAR") || body.contains("VEVENT")
}

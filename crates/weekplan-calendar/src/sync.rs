//! Background sync timers.
//!
//! One recurring timer per (feed URL, secondary flag, frequency)
//! configuration. Every timer fires an immediate cycle on start, then ticks
//! at the frequency's interval. A cycle pulls the primary feed through the
//! cache, merges in the secondary source when it is enabled and ready, and
//! fans the combined list out to observers.
//!
//! Stopping is cooperative: a cancelled timer stops scheduling new ticks but
//! an in-flight cycle is allowed to finish.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, EventCache};
use crate::error::CalendarError;
use crate::fetch::FeedFetcher;
use crate::parser;
use crate::sources::EventSource;
use crate::types::CalendarEvent;
use weekplan_core::SyncFrequency;

/// Called with the combined event list after every successful cycle.
pub type ObserverCallback = Arc<dyn Fn(&[CalendarEvent]) + Send + Sync>;

/// Identity of one timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub url: String,
    pub secondary_enabled: bool,
    pub frequency: SyncFrequency,
}

/// Point-in-time view of a URL's sync state.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// At least one timer exists for the URL
    pub timer_active: bool,
    /// A cycle for the URL is currently running
    pub in_flight: bool,
    pub last_synced: Option<DateTime<Utc>>,
}

struct Observer {
    id: u64,
    url: String,
    callback: ObserverCallback,
}

type PendingKey = (String, bool, NaiveDate);

struct SchedulerInner {
    fetcher: FeedFetcher,
    cache: EventCache,
    secondary: Option<Arc<dyn EventSource>>,
    timers: Mutex<HashMap<SyncKey, CancellationToken>>,
    observers: Mutex<Vec<Observer>>,
    pending: Mutex<HashSet<PendingKey>>,
    // One entry per synced URL; stop_all removes the URL's entry
    last_synced: Mutex<HashMap<String, DateTime<Utc>>>,
    next_observer_id: AtomicU64,
}

/// Removes the pending-set entry when the cycle ends, on any path out.
struct PendingGuard<'a> {
    inner: &'a SchedulerInner,
    key: PendingKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.key);
    }
}

impl SchedulerInner {
    /// Primary feed events for a week, served from cache when fresh.
    async fn primary_events(
        &self,
        url: &str,
        week_start: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let cache_key = CacheKey::new(url, week_start);
        if let Some(hit) = self.cache.get(&cache_key) {
            tracing::debug!(url, count = hit.len(), "serving events from cache");
            return Ok(hit);
        }

        let raw = self.fetcher.fetch(url).await?;
        let events = parser::parse(&raw, week_start);
        self.cache.put(cache_key, events.clone());
        Ok(events)
    }

    async fn run_cycle(
        &self,
        url: &str,
        secondary_enabled: bool,
        week_start: NaiveDate,
        on_update: Option<&ObserverCallback>,
    ) {
        let pending_key = (url.to_string(), secondary_enabled, week_start);
        if !self.pending.lock().insert(pending_key.clone()) {
            tracing::debug!(url, "sync cycle already in flight, skipping tick");
            return;
        }
        let _guard = PendingGuard {
            inner: self,
            key: pending_key,
        };

        let mut events = Vec::new();

        if !url.is_empty() {
            match self.primary_events(url, week_start).await {
                Ok(list) => events.extend(list),
                // Soft failure: the cycle still runs with whatever else we have
                Err(err) => {
                    tracing::warn!(url, error = %err, "primary feed unavailable this cycle");
                }
            }
        }

        if secondary_enabled {
            if let Some(source) = &self.secondary {
                if source.is_ready() {
                    match source.events_for_week(week_start).await {
                        Ok(list) => events.extend(list),
                        Err(err) => {
                            tracing::warn!(
                                source = source.kind().as_str(),
                                error = %err,
                                "secondary source failed this cycle"
                            );
                        }
                    }
                } else {
                    tracing::debug!(
                        source = source.kind().as_str(),
                        "secondary source enabled but not ready"
                    );
                }
            }
        }

        events.sort_by_key(|e| e.start.sort_key());
        self.last_synced.lock().insert(url.to_string(), Utc::now());
        tracing::info!(url, count = events.len(), "sync cycle complete");

        let callbacks: Vec<ObserverCallback> = self
            .observers
            .lock()
            .iter()
            .map(|o| Arc::clone(&o.callback))
            .collect();
        for callback in callbacks {
            callback(&events);
        }
        if let Some(callback) = on_update {
            callback(&events);
        }
    }
}

/// Owns the timers and observers for all active sync configurations.
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    pub fn new(fetcher: FeedFetcher) -> Self {
        Self::build(fetcher, None)
    }

    /// Scheduler with a secondary source merged into every enabled cycle.
    pub fn with_secondary(fetcher: FeedFetcher, source: Arc<dyn EventSource>) -> Self {
        Self::build(fetcher, Some(source))
    }

    fn build(fetcher: FeedFetcher, secondary: Option<Arc<dyn EventSource>>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                fetcher,
                cache: EventCache::new(),
                secondary,
                timers: Mutex::new(HashMap::new()),
                observers: Mutex::new(Vec::new()),
                pending: Mutex::new(HashSet::new()),
                last_synced: Mutex::new(HashMap::new()),
                next_observer_id: AtomicU64::new(1),
            }),
        }
    }

    /// Run one immediate cycle, then arm a recurring timer.
    ///
    /// Starting an already-running identical configuration replaces its
    /// timer; there is never more than one timer per key.
    pub fn start(
        &self,
        url: &str,
        secondary_enabled: bool,
        frequency: SyncFrequency,
        week_start: NaiveDate,
        on_update: ObserverCallback,
    ) {
        let key = SyncKey {
            url: url.to_string(),
            secondary_enabled,
            frequency,
        };
        self.stop(url, secondary_enabled, frequency);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();

        tracing::info!(url, ?frequency, "starting sync timer");
        tokio::spawn(async move {
            inner
                .run_cycle(
                    &task_key.url,
                    task_key.secondary_enabled,
                    week_start,
                    Some(&on_update),
                )
                .await;

            let mut ticker = tokio::time::interval(task_key.frequency.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick resolves immediately; the initial cycle above
            // already covered it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner
                            .run_cycle(
                                &task_key.url,
                                task_key.secondary_enabled,
                                week_start,
                                Some(&on_update),
                            )
                            .await;
                    }
                }
            }
            tracing::debug!(url = %task_key.url, "sync timer stopped");
        });

        self.inner.timers.lock().insert(key, cancel);
    }

    /// Stop the timer for this exact configuration. Differently-keyed timers
    /// for the same URL keep running.
    pub fn stop(&self, url: &str, secondary_enabled: bool, frequency: SyncFrequency) {
        let key = SyncKey {
            url: url.to_string(),
            secondary_enabled,
            frequency,
        };
        if let Some(token) = self.inner.timers.lock().remove(&key) {
            tracing::info!(url, ?frequency, "stopping sync timer");
            token.cancel();
        }
    }

    /// Stop every timer for a URL and drop the observers registered for it.
    /// Registrations for other URLs are untouched.
    pub fn stop_all(&self, url: &str) {
        let mut timers = self.inner.timers.lock();
        let keys: Vec<SyncKey> = timers
            .keys()
            .filter(|key| key.url == url)
            .cloned()
            .collect();
        for key in keys {
            if let Some(token) = timers.remove(&key) {
                token.cancel();
            }
        }
        drop(timers);

        self.inner.observers.lock().retain(|o| o.url != url);
        self.inner.last_synced.lock().remove(url);
        tracing::info!(url, "stopped all sync timers");
    }

    /// Register a callback fired after every cycle, tied to a URL for
    /// cleanup via [`stop_all`](Self::stop_all). Returns an id for
    /// [`remove_observer`](Self::remove_observer).
    pub fn add_observer(&self, url: &str, callback: ObserverCallback) -> u64 {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().push(Observer {
            id,
            url: url.to_string(),
            callback,
        });
        id
    }

    pub fn remove_observer(&self, id: u64) {
        self.inner.observers.lock().retain(|o| o.id != id);
    }

    /// Invalidate the week's cache entry and run one cycle immediately,
    /// guaranteeing a network round-trip even inside the TTL window.
    pub async fn force_sync(&self, url: &str, secondary_enabled: bool, week_start: NaiveDate) {
        self.inner.cache.invalidate_week(url, week_start);
        self.inner
            .run_cycle(url, secondary_enabled, week_start, None)
            .await;
    }

    pub fn sync_status(&self, url: &str) -> SyncStatus {
        SyncStatus {
            timer_active: self.inner.timers.lock().keys().any(|k| k.url == url),
            in_flight: self.inner.pending.lock().iter().any(|(u, _, _)| u == url),
            last_synced: self.inner.last_synced.lock().get(url).copied(),
        }
    }

    /// Number of active timers across all configurations.
    pub fn active_timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }

    /// Number of registered observers across all URLs.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    pub fn cache(&self) -> &EventCache {
        &self.inner.cache
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::fetch::RetrievalRoute;
    use crate::types::{EventSourceKind, EventTime};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED_BODY: &str = "BEGIN:VCALENDAR\n\
        BEGIN:VEVENT\n\
        DTSTART:20250915T100000Z\n\
        DTEND:20250915T110000Z\n\
        SUMMARY:Planning\n\
        UID:evt1\n\
        END:VEVENT\n\
        END:VCALENDAR\n";

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 15).unwrap()
    }

    fn test_routes(server: &MockServer) -> Vec<RetrievalRoute> {
        vec![RetrievalRoute::new(
            "test",
            format!("{}/feed?url=", server.uri()),
            true,
        )]
    }

    fn scheduler_for(server: &MockServer) -> SyncScheduler {
        SyncScheduler::new(FeedFetcher::with_routes(test_routes(server)))
    }

    fn channel_observer() -> (ObserverCallback, mpsc::UnboundedReceiver<Vec<CalendarEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ObserverCallback = Arc::new(move |events: &[CalendarEvent]| {
            let _ = tx.send(events.to_vec());
        });
        (callback, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Vec<CalendarEvent>>) -> Vec<CalendarEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for sync cycle")
            .expect("observer channel closed")
    }

    async fn mount_feed(server: &MockServer, expected_fetches: u64) {
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
            .expect(expected_fetches)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_start_runs_immediate_cycle() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;

        let scheduler = scheduler_for(&server);
        let (on_update, mut rx) = channel_observer();
        scheduler.start(
            "https://calendar.example.com/feed.ics",
            false,
            SyncFrequency::Daily,
            week(),
            on_update,
        );

        let events = recv(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "evt1");

        let status = scheduler.sync_status("https://calendar.example.com/feed.ics");
        assert!(status.timer_active);
        assert!(status.last_synced.is_some());
    }

    #[tokio::test]
    async fn test_cached_week_avoids_refetch() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;

        let scheduler = scheduler_for(&server);
        let url = "https://calendar.example.com/feed.ics";

        let (first, mut rx1) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Daily, week(), first);
        recv(&mut rx1).await;

        // Differently-keyed start within the TTL: cycle runs, network does not
        let (second, mut rx2) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Hourly, week(), second);
        let events = recv(&mut rx2).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_force_sync_bypasses_fresh_cache() {
        let server = MockServer::start().await;
        mount_feed(&server, 2).await;

        let scheduler = scheduler_for(&server);
        let url = "https://calendar.example.com/feed.ics";

        let (on_update, mut rx) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Daily, week(), on_update);
        recv(&mut rx).await;

        scheduler.force_sync(url, false, week()).await;
    }

    #[tokio::test]
    async fn test_overlapping_cycles_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(FEED_BODY)
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let scheduler = scheduler_for(&server);
        let url = "https://calendar.example.com/feed.ics";

        // Second concurrent cycle for the same pending key is a no-op
        tokio::join!(
            scheduler.force_sync(url, false, week()),
            scheduler.force_sync(url, false, week()),
        );
    }

    #[tokio::test]
    async fn test_duplicate_start_keeps_single_timer() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;

        let scheduler = scheduler_for(&server);
        let url = "https://calendar.example.com/feed.ics";

        let (first, mut rx) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Daily, week(), first);
        recv(&mut rx).await;

        let (second, mut rx) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Daily, week(), second);
        recv(&mut rx).await;

        assert_eq!(scheduler.active_timer_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_scoped_to_exact_key() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;

        let scheduler = scheduler_for(&server);
        let url = "https://calendar.example.com/feed.ics";

        let (first, mut rx) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Daily, week(), first);
        recv(&mut rx).await;
        let (second, mut rx) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Hourly, week(), second);
        recv(&mut rx).await;

        scheduler.stop(url, false, SyncFrequency::Daily);

        assert_eq!(scheduler.active_timer_count(), 1);
        assert!(scheduler.sync_status(url).timer_active);

        scheduler.stop(url, false, SyncFrequency::Hourly);
        assert!(!scheduler.sync_status(url).timer_active);
    }

    #[tokio::test]
    async fn test_stop_all_clears_only_that_urls_observers() {
        let server = MockServer::start().await;
        mount_feed(&server, 2).await;

        let scheduler = scheduler_for(&server);
        let url_a = "https://a.example.com/feed.ics";
        let url_b = "https://b.example.com/feed.ics";

        let (obs_a, _rx_a) = channel_observer();
        let (obs_b, _rx_b) = channel_observer();
        scheduler.add_observer(url_a, obs_a);
        scheduler.add_observer(url_b, obs_b);

        let (upd_a, mut rx) = channel_observer();
        scheduler.start(url_a, false, SyncFrequency::Daily, week(), upd_a);
        recv(&mut rx).await;
        let (upd_b, mut rx) = channel_observer();
        scheduler.start(url_b, false, SyncFrequency::Daily, week(), upd_b);
        recv(&mut rx).await;

        scheduler.stop_all(url_a);

        assert!(!scheduler.sync_status(url_a).timer_active);
        assert!(scheduler.sync_status(url_a).last_synced.is_none());
        assert!(scheduler.sync_status(url_b).timer_active);
        assert!(scheduler.sync_status(url_b).last_synced.is_some());
        assert_eq!(scheduler.observer_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_observer() {
        let server = MockServer::start().await;
        let scheduler = scheduler_for(&server);

        let (obs, _rx) = channel_observer();
        let id = scheduler.add_observer("https://a.example.com/feed.ics", obs);
        assert_eq!(scheduler.observer_count(), 1);

        scheduler.remove_observer(id);
        assert_eq!(scheduler.observer_count(), 0);
    }

    struct StubSource {
        ready: bool,
    }

    #[async_trait::async_trait]
    impl EventSource for StubSource {
        fn kind(&self) -> EventSourceKind {
            EventSourceKind::Google
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn events_for_week(
            &self,
            _week_start: NaiveDate,
        ) -> Result<Vec<CalendarEvent>, CalendarError> {
            Ok(vec![CalendarEvent {
                id: "sec1".to_string(),
                title: "Design Review".to_string(),
                start: EventTime::Utc(
                    DateTime::parse_from_rfc3339("2025-09-16T15:00:00Z")
                        .unwrap()
                        .with_timezone(&Utc),
                ),
                end: EventTime::Utc(
                    DateTime::parse_from_rfc3339("2025-09-16T16:00:00Z")
                        .unwrap()
                        .with_timezone(&Utc),
                ),
                all_day: false,
                description: None,
                location: None,
                source: EventSourceKind::Google,
            }])
        }
    }

    #[tokio::test]
    async fn test_secondary_source_merges_into_cycle() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;

        let scheduler = SyncScheduler::with_secondary(
            FeedFetcher::with_routes(test_routes(&server)),
            Arc::new(StubSource { ready: true }),
        );
        let (on_update, mut rx) = channel_observer();
        scheduler.start(
            "https://calendar.example.com/feed.ics",
            true,
            SyncFrequency::Daily,
            week(),
            on_update,
        );

        let events = recv(&mut rx).await;
        assert_eq!(events.len(), 2);
        // Combined list is sorted by start across sources
        assert_eq!(events[0].id, "evt1");
        assert_eq!(events[0].source, EventSourceKind::Feed);
        assert_eq!(events[1].id, "sec1");
        assert_eq!(events[1].source, EventSourceKind::Google);
    }

    #[tokio::test]
    async fn test_unready_secondary_contributes_nothing() {
        let server = MockServer::start().await;
        mount_feed(&server, 1).await;

        let scheduler = SyncScheduler::with_secondary(
            FeedFetcher::with_routes(test_routes(&server)),
            Arc::new(StubSource { ready: false }),
        );
        let (on_update, mut rx) = channel_observer();
        scheduler.start(
            "https://calendar.example.com/feed.ics",
            true,
            SyncFrequency::Daily,
            week(),
            on_update,
        );

        let events = recv(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, EventSourceKind::Feed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_at_interval_until_stopped() {
        // Routes with an unparseable scheme fail without any network IO, so
        // cycles complete instantly under the paused clock
        let routes = vec![RetrievalRoute::new("unreachable", "bad-scheme://", false)];
        let scheduler = SyncScheduler::new(FeedFetcher::with_routes(routes));
        let url = "https://calendar.example.com/feed.ics";

        let (on_update, mut rx) = channel_observer();
        scheduler.start(url, false, SyncFrequency::Realtime, week(), on_update);

        // Immediate cycle on start
        assert!(rx.recv().await.is_some());

        // Next cycle fires once the 30 minute interval elapses
        tokio::time::advance(SyncFrequency::Realtime.interval()).await;
        assert!(rx.recv().await.is_some());

        scheduler.stop(url, false, SyncFrequency::Realtime);
        tokio::task::yield_now().await;

        // A stopped timer delivers nothing, however far the clock moves
        tokio::time::advance(SyncFrequency::Realtime.interval() * 3).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cycle_survives_feed_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let scheduler = scheduler_for(&server);
        let (on_update, mut rx) = channel_observer();
        scheduler.start(
            "https://calendar.example.com/feed.ics",
            false,
            SyncFrequency::Daily,
            week(),
            on_update,
        );

        // Observers still hear from the cycle, with an empty list
        let events = recv(&mut rx).await;
        assert!(events.is_empty());
    }
}

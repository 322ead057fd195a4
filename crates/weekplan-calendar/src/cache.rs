//! Time-bounded memoization of parsed events.
//!
//! Entries are keyed by (source identity, week start) and expire after a
//! fixed TTL. Memory-resident only; the cache is rebuilt on restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::types::CalendarEvent;

/// Entries are reused for one hour before a refetch.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Source identity (the feed URL, or an adapter identifier)
    pub source: String,
    pub week_start: NaiveDate,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, week_start: NaiveDate) -> Self {
        Self {
            source: source.into(),
            week_start,
        }
    }
}

struct CacheEntry {
    events: Vec<CalendarEvent>,
    expires_at: Instant,
}

/// In-memory event cache with per-entry expiry.
pub struct EventCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Cache with a custom TTL (tests).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Events for a key, or None when absent or expired.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<CalendarEvent>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.events.clone())
    }

    /// Store events for a key, replacing any previous entry.
    ///
    /// Writes double as a sweep: entries past their expiry are dropped, so
    /// the map stays bounded by live (source, week) pairs.
    pub fn put(&self, key: CacheKey, events: Vec<CalendarEvent>) {
        let now = Instant::now();
        let entry = CacheEntry {
            events,
            expires_at: now + self.ttl,
        };
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(key, entry);
    }

    /// Drop every entry belonging to a source.
    pub fn invalidate_source(&self, source: &str) {
        self.entries.write().retain(|key, _| key.source != source);
    }

    /// Drop the entry for one (source, week) pair, forcing the next read to
    /// go over the network.
    pub fn invalidate_week(&self, source: &str, week_start: NaiveDate) {
        self.entries
            .write()
            .remove(&CacheKey::new(source, week_start));
    }

    /// Drop everything.
    pub fn clear_all(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, expired or not.
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

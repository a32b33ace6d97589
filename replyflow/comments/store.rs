use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{merge, model::CacheKey, model::Comment};

/// Cached comment list for one key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Comments in fetch order.
    pub comments: Vec<Comment>,
    /// Incremented on every write to this key.
    pub version: u64,
    /// Last remote fetch (or full replacement); `None` for patch-only entries.
    pub fetched_at: Option<Instant>,
    /// Wall-clock time of the last write.
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is older than `stale_after`.
    #[must_use]
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.fetched_at
            .map_or(true, |fetched| fetched.elapsed() >= stale_after)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: IndexMap<CacheKey, CacheEntry>,
    watchers: HashMap<CacheKey, watch::Sender<u64>>,
}

impl CacheState {
    fn write(&mut self, key: &CacheKey, comments: Vec<Comment>, fetched: bool) -> u64 {
        let now = Utc::now();
        let version = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.comments = comments;
                entry.version += 1;
                entry.updated_at = now;
                if fetched {
                    entry.fetched_at = Some(Instant::now());
                }
                entry.version
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    CacheEntry {
                        comments,
                        version: 1,
                        fetched_at: fetched.then(Instant::now),
                        updated_at: now,
                    },
                );
                1
            }
        };
        if let Some(sender) = self.watchers.get(key) {
            sender.send_replace(version);
        }
        version
    }

    fn current(&self, key: &CacheKey) -> Vec<Comment> {
        self.entries
            .get(key)
            .map(|entry| entry.comments.clone())
            .unwrap_or_default()
    }
}

/// Session-scoped store of comment lists keyed by (subject, bucket).
///
/// Clones share the same state. Writes to any key are serialized; the
/// closure passed to [`CommentCache::update`] runs under the lock.
#[derive(Debug, Clone, Default)]
pub struct CommentCache {
    state: Arc<Mutex<CacheState>>,
}

impl CommentCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry for `key`.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Replaces the list for `key` and records it as freshly fetched.
    /// Returns the new version.
    pub fn set(&self, key: &CacheKey, comments: Vec<Comment>) -> u64 {
        self.state.lock().write(key, comments, true)
    }

    /// Read-modify-write. `apply` receives the current list (empty when
    /// absent) and returns the replacement. Freshness is left unchanged.
    pub fn update<F>(&self, key: &CacheKey, apply: F) -> u64
    where
        F: FnOnce(Vec<Comment>) -> Vec<Comment>,
    {
        let mut state = self.state.lock();
        let next = apply(state.current(key));
        state.write(key, next, false)
    }

    /// Read-modify-write that only applies while `key` is cached. Returns the
    /// new version, or `None` without writing when the entry is gone.
    pub fn update_existing<F>(&self, key: &CacheKey, apply: F) -> Option<u64>
    where
        F: FnOnce(Vec<Comment>) -> Vec<Comment>,
    {
        let mut state = self.state.lock();
        let current = state.entries.get(key)?.comments.clone();
        let next = apply(current);
        Some(state.write(key, next, false))
    }

    /// Stores a refetched list, carrying over recommendations of comments
    /// the fresh copy returns without any.
    pub fn refresh(&self, key: &CacheKey, fetched: Vec<Comment>) -> Vec<Comment> {
        let mut state = self.state.lock();
        let merged = merge::carry_over(&state.current(key), fetched);
        state.write(key, merged.clone(), true);
        merged
    }

    /// Whether `key` is absent or older than `stale_after`.
    #[must_use]
    pub fn is_stale(&self, key: &CacheKey, stale_after: Duration) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .map_or(true, |entry| entry.is_stale(stale_after))
    }

    /// Keys in first-write order.
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Observes writes to `key`. Dropping the subscription unsubscribes.
    #[must_use]
    pub fn subscribe(&self, key: &CacheKey) -> CacheSubscription {
        let mut state = self.state.lock();
        let version = state.entries.get(key).map_or(0, |entry| entry.version);
        let receiver = state
            .watchers
            .entry(key.clone())
            .or_insert_with(|| watch::channel(version).0)
            .subscribe();
        CacheSubscription {
            key: key.clone(),
            cache: self.clone(),
            receiver,
        }
    }

    /// Drops every entry and closes open subscriptions (session end).
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.watchers.clear();
    }
}

/// Per-key observer handle returned by [`CommentCache::subscribe`].
#[derive(Debug)]
pub struct CacheSubscription {
    key: CacheKey,
    cache: CommentCache,
    receiver: watch::Receiver<u64>,
}

impl CacheSubscription {
    /// Key being observed.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Waits for the next write and returns the entry as of that moment.
    /// Returns `None` once the cache has been cleared.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.receiver.changed().await.ok()?;
        self.cache.get(&self.key)
    }

    /// Current entry without waiting.
    #[must_use]
    pub fn current(&self) -> Option<CacheEntry> {
        self.cache.get(&self.key)
    }
}

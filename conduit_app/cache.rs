use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::time::Instant;

/// Storage backing `CachingBehavior`. Values are kept as JSON so one store
/// can serve every query type.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live entry for `key`, if any.
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: String, value: Value, ttl: Duration);
    async fn remove(&self, key: &str);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

const DEFAULT_PURGE_INTERVAL: usize = 256;

/// Process-local `CacheStore` with per-entry expiry.
///
/// Expired entries are dropped when read, and every `purge_interval` writes
/// the whole map is swept, so keys that are never read again don't pile up.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
    writes: AtomicUsize,
    purge_interval: usize,
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweeps expired entries every `interval` writes (at least one).
    pub fn with_purge_interval(interval: usize) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicUsize::new(0),
            purge_interval: interval.max(1),
        }
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        // The read guard has to be gone before removing from the same shard.
        if hit {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    async fn set(&self, key: String, value: Value, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries.insert(key, CacheEntry { value, expires_at });

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.purge_interval == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(
                    purged,
                    remaining = self.entries.len(),
                    "Purged expired cache entries"
                );
            }
        }
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

//! In-memory response store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::StatusCode;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::cache::key::CacheKey;
use crate::config::CacheConfig;
use crate::observability::metrics;

/// A stored response body.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub body: Bytes,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// Thread-safe response cache shared by all requests.
///
/// Lookups and stores take short per-shard locks only; nothing is held
/// while a request is in flight.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entry_bytes: usize,
}

const DEFAULT_MAX_ENTRY_BYTES: usize = 1024 * 1024;

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl()).with_max_entry_bytes(config.max_entry_bytes)
    }

    pub fn with_max_entry_bytes(mut self, max_entry_bytes: usize) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Largest body [`ResponseCache::store`] accepts.
    pub fn max_entry_bytes(&self) -> usize {
        self.max_entry_bytes
    }

    /// Return the stored body if the entry is still fresh.
    pub fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => return Some(entry.body.clone()),
            Some(_) => {}
            None => return None,
        }
        // Expired; drop it unless a newer store already replaced it.
        self.entries.remove_if(key, |_, entry| !entry.is_fresh(now));
        None
    }

    /// Store a response body. Only `200 OK` responses within the size
    /// bound are kept; returns whether the entry was written.
    pub fn store(&self, key: CacheKey, status: StatusCode, body: Bytes) -> bool {
        if status != StatusCode::OK || body.len() > self.max_entry_bytes {
            return false;
        }
        self.entries.insert(
            key,
            CacheEntry {
                body,
                stored_at: Instant::now(),
                ttl: self.ttl,
            },
        );
        metrics::record_cache_size(self.entries.len());
        true
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before.saturating_sub(self.entries.len());
        metrics::record_cache_size(self.entries.len());
        removed
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        metrics::record_cache_size(0);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    fn key(path: &str) -> CacheKey {
        CacheKey::new(path, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_and_lookup() {
        let cache = ResponseCache::new(TTL);
        assert!(cache.lookup(&key("/api/tasks")).is_none());

        assert!(cache.store(key("/api/tasks"), StatusCode::OK, Bytes::from_static(b"[1]")));
        assert_eq!(cache.lookup(&key("/api/tasks")).unwrap(), Bytes::from_static(b"[1]"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_ok_is_stored() {
        let cache = ResponseCache::new(TTL);
        for status in [
            StatusCode::CREATED,
            StatusCode::NO_CONTENT,
            StatusCode::FOUND,
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            assert!(!cache.store(key("/x"), status, Bytes::from_static(b"{}")));
        }
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_body_is_not_stored() {
        let cache = ResponseCache::new(TTL).with_max_entry_bytes(4);
        assert!(cache.store(key("/small"), StatusCode::OK, Bytes::from_static(b"1234")));
        assert!(!cache.store(key("/big"), StatusCode::OK, Bytes::from_static(b"12345")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new(TTL);
        cache.store(key("/a"), StatusCode::OK, Bytes::from_static(b"a"));

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert!(cache.lookup(&key("/a")).is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.lookup(&key("/a")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_writer_wins() {
        let cache = ResponseCache::new(TTL);
        cache.store(key("/a"), StatusCode::OK, Bytes::from_static(b"first"));
        cache.store(key("/a"), StatusCode::OK, Bytes::from_static(b"second"));
        assert_eq!(cache.lookup(&key("/a")).unwrap(), Bytes::from_static(b"second"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = ResponseCache::new(TTL);
        cache.store(key("/old"), StatusCode::OK, Bytes::from_static(b"old"));
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.store(key("/new"), StatusCode::OK, Bytes::from_static(b"new"));
        tokio::time::advance(Duration::from_secs(100)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.lookup(&key("/new")).is_some());
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}

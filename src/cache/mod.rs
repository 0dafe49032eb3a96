//! Caching module for trendgate
//!
//! Time-bounded store of search results keyed by the exact query text.

use crate::search::TweetsPayload;
use moka::future::Cache;
use std::time::Duration;
use tokio::time::Instant;

/// Default freshness window for cached results
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct CacheEntry {
    value: TweetsPayload,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Cache for search results
///
/// Entries carry their own expiry, checked at read time. The capacity bound
/// only guards memory; there is no time-based sweep.
pub struct ResponseCache {
    cache: Cache<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Create a new response cache
    pub fn new(default_ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();

        Self { cache, default_ttl }
    }

    /// Get a cached result, treating expired entries as absent
    pub async fn get(&self, query: &str) -> Option<TweetsPayload> {
        let entry = self.cache.get(query).await?;
        if entry.is_live() {
            Some(entry.value)
        } else {
            self.cache.invalidate(query).await;
            None
        }
    }

    /// Store a result, replacing any previous entry for the same query
    pub async fn put(&self, query: &str, value: TweetsPayload, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.cache.insert(query.to_string(), entry).await;
    }

    /// Store a result with the default TTL
    pub async fn put_default(&self, query: &str, value: TweetsPayload) {
        self.put(query, value, self.default_ttl).await;
    }

    /// Remove a cached result
    pub async fn remove(&self, query: &str) {
        self.cache.invalidate(query).await;
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Number of stored entries, expired ones included until next read
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, 10_000)
    }
}

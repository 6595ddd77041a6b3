//! Idempotency cache for create requests.
//!
//! Keyed by (collection, Idempotency-Key) with a 24 hour window. A cache
//! hit replays the original response verbatim. Single-process scope is
//! sufficient; expired entries are swept lazily on insert.

use std::time::{Duration, Instant};

use dashmap::DashMap;

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);
const SWEEP_THRESHOLD: usize = 1024;

/// A stored response: status plus the exact JSON body.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

#[derive(Debug)]
struct CacheEntry {
    response: CachedResponse,
    stored_at: Instant,
}

/// Keyed short-TTL response cache.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: DashMap<(String, String), CacheEntry>,
    ttl: Duration,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    /// Looks up a previous response for this (collection, key).
    pub fn get(&self, collection: &str, key: &str) -> Option<CachedResponse> {
        let map_key = (collection.to_string(), key.to_string());
        let entry = self.entries.get(&map_key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(&map_key);
            return None;
        }
        Some(entry.response.clone())
    }

    /// Stores the response produced for this (collection, key).
    pub fn put(&self, collection: &str, key: &str, status: u16, body: serde_json::Value) {
        if self.entries.len() >= SWEEP_THRESHOLD {
            let ttl = self.ttl;
            self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        }
        self.entries.insert(
            (collection.to_string(), key.to_string()),
            CacheEntry {
                response: CachedResponse { status, body },
                stored_at: Instant::now(),
            },
        );
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

    #[test]
    fn test_hit_replays_response() {
        let cache = IdempotencyCache::default();
        cache.put("products", "key-1", 201, serde_json::json!({"id": "abc"}));

        let hit = cache.get("products", "key-1").unwrap();
        assert_eq!(hit.status, 201);
        assert_eq!(hit.body["id"], "abc");
    }

    #[test]
    fn test_scoped_per_collection() {
        let cache = IdempotencyCache::default();
        cache.put("products", "key-1", 201, serde_json::json!({}));
        assert!(cache.get("orders", "key-1").is_none());
        assert!(cache.get("products", "key-2").is_none());
    }

    #[test]
    fn test_expired_entries_vanish() {
        let cache = IdempotencyCache::new(Duration::from_millis(10));
        cache.put("products", "key-1", 201, serde_json::json!({}));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("products", "key-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_replaces() {
        let cache = IdempotencyCache::default();
        cache.put("products", "k", 201, serde_json::json!({"v": 1}));
        cache.put("products", "k", 207, serde_json::json!({"v": 2}));
        let hit = cache.get("products", "k").unwrap();
        assert_eq!(hit.status, 207);
        assert_eq!(cache.len(), 1);
    }
}

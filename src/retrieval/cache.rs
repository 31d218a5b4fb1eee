//! Short-TTL cache for fused (pre-rerank) search results.
//!
//! Keyed by normalized query, tenant scope, k, and control filter.
//! Correctness never depends on the cache: entries expire within seconds
//! to minutes and the reranker always runs on whatever it returns.

use crate::retrieval::rrf::FusedChunk;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default time-to-live for cached fused results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Cache key: normalized query plus scope parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Lowercased, whitespace-collapsed query.
    pub query: String,
    /// Tenant scope.
    pub organization_id: i64,
    /// Requested result count.
    pub k: usize,
    /// Explicit control filter, if any.
    pub control_id: Option<String>,
}

impl CacheKey {
    /// Builds a key with query normalization applied.
    #[must_use]
    pub fn new(query: &str, organization_id: i64, k: usize, control_id: Option<&str>) -> Self {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        Self {
            query: normalized,
            organization_id,
            k,
            control_id: control_id.map(ToString::to_string),
        }
    }
}

/// In-process search result cache.
pub struct SearchCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, (Instant, Vec<FusedChunk>)>>,
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl SearchCache {
    /// Creates a cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a non-expired entry, if present.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Vec<FusedChunk>> {
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        match entries.get(key) {
            Some((at, value)) if at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores an entry, evicting anything expired.
    pub fn put(&self, key: CacheKey, value: Vec<FusedChunk>) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let ttl = self.ttl;
        entries.retain(|_, (at, _)| at.elapsed() < ttl);
        entries.insert(key, (Instant::now(), value));
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        let a = CacheKey::new("  Kako   zadovoljiti POL-001 ", 1, 8, None);
        let b = CacheKey::new("kako zadovoljiti pol-001", 1, 8, None);
        assert_eq!(a, b);

        let c = CacheKey::new("kako zadovoljiti pol-001", 2, 8, None);
        assert_ne!(a, c);
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = SearchCache::default();
        let key = CacheKey::new("query", 1, 8, None);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), Vec::new());
        assert!(cache.get(&key).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expiry() {
        let cache = SearchCache::new(Duration::from_millis(10));
        let key = CacheKey::new("query", 1, 8, None);
        cache.put(key.clone(), Vec::new());
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }
}

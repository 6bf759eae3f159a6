//! Bounded, TTL'd in-memory caches, adapted from the operator's
//! `BoundedPendingCache` for string-keyed AML lookups.
//!
//! Backs the Address Risk Cache (spec.md §3): a 24h freshness window is
//! consulted before any AML provider is queried for a given address.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const DEFAULT_MAX_SIZE: usize = 50_000;

/// Bounded cache for `String → T` with max-size and TTL eviction.
pub struct BoundedTtlCache<T> {
    map: HashMap<String, (T, Instant)>,
    max_size: usize,
    ttl: Duration,
}

impl<T: Clone> BoundedTtlCache<T> {
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_capacity(DEFAULT_MAX_SIZE, ttl_secs)
    }

    pub fn with_capacity(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_size,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// A fresh cached value for `key`, or `None` if absent or stale.
    pub fn get(&self, key: &str) -> Option<T> {
        self.map
            .get(key)
            .filter(|(_, t)| t.elapsed() < self.ttl)
            .map(|(v, _)| v.clone())
    }

    pub fn insert(&mut self, key: String, value: T) {
        let now = Instant::now();
        self.map.retain(|_, (_, t)| now.duration_since(*t) < self.ttl);
        while self.map.len() >= self.max_size && !self.map.is_empty() {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, (_, t))| *t)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                self.map.remove(&k);
            } else {
                break;
            }
        }
        self.map.insert(key, (value, now));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_insert_and_get() {
        let mut cache = BoundedTtlCache::new(3600);
        cache.insert("0xabc".to_string(), 42u32);
        assert_eq!(cache.get("0xabc"), Some(42));
    }

    #[test]
    fn test_miss_for_unknown_key() {
        let cache: BoundedTtlCache<u32> = BoundedTtlCache::new(3600);
        assert_eq!(cache.get("0xabc"), None);
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let mut cache = BoundedTtlCache::new(0);
        cache.insert("0xabc".to_string(), 1u32);
        sleep(Duration::from_millis(5));
        assert_eq!(cache.get("0xabc"), None);
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut cache = BoundedTtlCache::with_capacity(2, 3600);
        cache.insert("a".to_string(), 1u32);
        cache.insert("b".to_string(), 2u32);
        cache.insert("c".to_string(), 3u32);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }
}

//! In-process TTL cache read through a [`Clock`]

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::clock::Clock;

struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Expired entries read as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| now - entry.inserted_at < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let inserted_at = self.clock.now();
        self.entries.write().insert(key, CacheEntry { value, inserted_at });
    }

    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.write().remove(key).map(|e| e.value)
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.inserted_at < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_entries_expire_with_clock() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::minutes(5), clock.clone());

        cache.insert("bakers", 42);
        assert_eq!(cache.get(&"bakers"), Some(42));

        clock.advance(Duration::minutes(4));
        assert_eq!(cache.get(&"bakers"), Some(42));

        clock.advance(Duration::minutes(1));
        assert_eq!(cache.get(&"bakers"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let cache: TtlCache<u64, String> = TtlCache::new(Duration::seconds(30), clock);

        cache.insert(1, "one".to_string());
        assert_eq!(cache.invalidate(&1), Some("one".to_string()));
        assert_eq!(cache.get(&1), None);
    }
}

//! LRU (Least Recently Used) cache with byte-based capacity.
//!
//! Shared by the block cache and the row cache. Every entry carries a
//! charge (its size in bytes); inserting past capacity evicts the least
//! recently used entries first.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

struct Entry<V> {
    value: V,
    charge: usize,
    tick: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    // recency tick -> key, oldest first
    order: BTreeMap<u64, K>,
    next_tick: u64,
    usage: usize,
}

/// Thread-safe LRU cache.
///
/// A capacity of 0 disables the cache: lookups miss and inserts are dropped.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
    counters: Counters,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Create a new cache with the specified capacity in bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use versadb::cache::LruCache;
    ///
    /// let cache: LruCache<u64, Vec<u8>> = LruCache::new(8 * 1024 * 1024);
    /// assert!(cache.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                usage: 0,
            }),
            counters: Counters::default(),
        }
    }

    /// Looks up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.capacity == 0 {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let mut inner = self.inner.lock();
        let tick = inner.next_tick;
        let found = match inner.map.get_mut(key) {
            Some(entry) => {
                let old_tick = entry.tick;
                entry.tick = tick;
                Some((old_tick, entry.value.clone()))
            }
            None => None,
        };
        match found {
            Some((old_tick, value)) => {
                inner.next_tick += 1;
                inner.order.remove(&old_tick);
                inner.order.insert(tick, key.clone());
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces `key`, evicting old entries to stay in capacity.
    ///
    /// Entries larger than the whole cache are not cached.
    pub fn insert(&self, key: K, value: V, charge: usize) {
        if self.capacity == 0 || charge > self.capacity {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(old) = inner.map.remove(&key) {
            inner.order.remove(&old.tick);
            inner.usage -= old.charge;
        }
        while inner.usage + charge > self.capacity {
            let Some((_, victim)) = inner.order.pop_first() else {
                break;
            };
            if let Some(old) = inner.map.remove(&victim) {
                inner.usage -= old.charge;
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.clone());
        inner.map.insert(key, Entry { value, charge, tick });
        inner.usage += charge;
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes every entry for which `pred` returns true.
    pub fn erase_if(&self, mut pred: impl FnMut(&K) -> bool) {
        let mut inner = self.inner.lock();
        let doomed: Vec<(u64, K)> = inner
            .map
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(k, e)| (e.tick, k.clone()))
            .collect();
        for (tick, key) in doomed {
            inner.order.remove(&tick);
            if let Some(old) = inner.map.remove(&key) {
                inner.usage -= old.charge;
            }
        }
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        CacheStats {
            lookups: hits + misses,
            hits,
            misses,
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        inner.usage = 0;
    }

    /// Bytes currently charged.
    pub fn size(&self) -> usize {
        self.inner.lock().usage
    }

    /// Get the cache capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache").field("capacity", &self.capacity).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_cache_basic_operations() {
        let cache: LruCache<u64, Vec<u8>> = LruCache::new(1024);

        assert_eq!(cache.get(&1), None);

        cache.insert(1, vec![1, 2, 3, 4], 4);
        assert_eq!(cache.get(&1), Some(vec![1, 2, 3, 4]));

        let stats = cache.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_cache_lru_eviction() {
        // Holds three entries of size 4
        let cache: LruCache<u64, u8> = LruCache::new(12);
        cache.insert(1, 1, 4);
        cache.insert(2, 2, 4);
        cache.insert(3, 3, 4);

        // Touch 1 so 2 becomes the oldest
        assert_eq!(cache.get(&1), Some(1));
        cache.insert(4, 4, 4);

        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(cache.get(&3), Some(3));
        assert_eq!(cache.get(&4), Some(4));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.size(), 12);
    }

    #[test]
    fn test_cache_replace_updates_charge() {
        let cache: LruCache<u64, u8> = LruCache::new(10);
        cache.insert(1, 1, 8);
        cache.insert(1, 2, 2);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get(&1), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_disabled_and_oversized() {
        let disabled: LruCache<u64, u8> = LruCache::new(0);
        disabled.insert(1, 1, 1);
        assert_eq!(disabled.get(&1), None);

        let small: LruCache<u64, u8> = LruCache::new(4);
        small.insert(1, 1, 5);
        assert!(small.is_empty());
    }

    #[test]
    fn test_cache_erase_if() {
        let cache: LruCache<(u64, u64), u8> = LruCache::new(100);
        cache.insert((1, 0), 1, 1);
        cache.insert((1, 8), 2, 1);
        cache.insert((2, 0), 3, 1);
        cache.erase_if(|(file, _)| *file == 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_concurrent_access() {
        let cache: Arc<LruCache<u64, u64>> = Arc::new(LruCache::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        cache.insert(t * 1000 + i, i, 8);
                        let _ = cache.get(&(t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.size() <= 1000);
    }
}

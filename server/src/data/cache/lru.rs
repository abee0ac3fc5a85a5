//! Strict least-recently-used map
//!
//! Every `get` and `put` moves the entry to the most-recent end; once `len`
//! exceeds `max_size` the least-recent entries are dropped. A `max_size` of
//! zero or less disables eviction.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use parking_lot::Mutex;

struct Inner<K, V> {
    entries: HashMap<K, (V, u64)>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, K>,
    next_tick: u64,
    max_size: i64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn touch(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn evict(&mut self) -> usize {
        if self.max_size <= 0 {
            return 0;
        }
        let mut evicted = 0;
        while self.entries.len() as i64 > self.max_size {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

/// Thread-safe strict LRU cache
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(max_size: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                max_size,
            }),
        }
    }

    /// Clone of the cached value; marks the entry most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        let tick = inner.touch();
        let inner = &mut *inner;
        let (value, old_tick) = inner.entries.get_mut(key)?;
        let old = std::mem::replace(old_tick, tick);
        let value = value.clone();
        if let Some(k) = inner.order.remove(&old) {
            inner.order.insert(tick, k);
        }
        Some(value)
    }

    /// Insert or replace, then evict down to `max_size`
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let tick = inner.touch();
        if let Some((_, old_tick)) = inner.entries.insert(key.clone(), (value, tick)) {
            inner.order.remove(&old_tick);
        }
        inner.order.insert(tick, key);
        inner.evict();
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        let (value, tick) = inner.entries.remove(key)?;
        inner.order.remove(&tick);
        Some(value)
    }

    /// Keep only entries for which `keep` returns true; returns how many were dropped
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let before = inner.entries.len();
        let order = &mut inner.order;
        inner.entries.retain(|k, (v, tick)| {
            let kept = keep(k, v);
            if !kept {
                order.remove(tick);
            }
            kept
        });
        before - inner.entries.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> i64 {
        self.inner.lock().max_size
    }

    /// Change the bound; shrinking evicts immediately
    pub fn set_max_size(&self, max_size: i64) -> usize {
        let mut inner = self.inner.lock();
        inner.max_size = max_size;
        inner.evict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_put_refreshes_recency() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);

        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_non_positive_max_is_unlimited() {
        for max in [0, -1] {
            let cache = LruCache::new(max);
            for i in 0..1000 {
                cache.put(i, i);
            }
            assert_eq!(cache.len(), 1000);
        }
    }

    #[test]
    fn test_set_max_size_evicts_oldest() {
        let cache = LruCache::new(0);
        for i in 0..5 {
            cache.put(i, i);
        }
        cache.get(&0);

        assert_eq!(cache.set_max_size(2), 3);
        assert_eq!(cache.get(&0), Some(0));
        assert_eq!(cache.get(&4), Some(4));
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_remove_retain_clear() {
        let cache = LruCache::new(10);
        for i in 0..6 {
            cache.put(i, i * 10);
        }
        assert_eq!(cache.remove(&0), Some(0));
        assert_eq!(cache.remove(&0), None);
        assert_eq!(cache.retain(|k, _| k % 2 == 0), 3);
        assert_eq!(cache.len(), 2);

        // order bookkeeping survives retain
        cache.set_max_size(1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&4), Some(40));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access_keeps_bound() {
        let cache = Arc::new(LruCache::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..2_000u64 {
                        let key = (t * 10_000 + i) % 500;
                        cache.put(key, i);
                        cache.get(&((key + 7) % 500));
                        if i % 97 == 0 {
                            cache.remove(&key);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 64);
        let inner = cache.inner.lock();
        assert_eq!(inner.entries.len(), inner.order.len());
    }
}

//! Bounded LRU cache shared by the resolver and the JWKS endpoint
//!
//! Entries live until capacity pressure evicts them (least-recently-used
//! first) or they are removed explicitly; there is no TTL. Recency is an
//! index-linked doubly-linked list over a slab of nodes, so `get`, `set` and
//! eviction are O(1). All operations run under one `parking_lot::Mutex`.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

/// Slab slot holding one entry and its recency links
struct Node<V> {
    key: String,
    value: V,
    /// Towards the most-recently-used end
    prev: Option<usize>,
    /// Towards the least-recently-used end
    next: Option<usize>,
}

struct Inner<V> {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    /// Most-recently-used
    head: Option<usize>,
    /// Least-recently-used
    tail: Option<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> Inner<V> {
    fn node(&self, idx: usize) -> &Node<V> {
        self.slots[idx].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<V> {
        self.slots[idx].as_mut().expect("linked slot is occupied")
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.node_mut(h).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn release(&mut self, idx: usize) -> Node<V> {
        self.detach(idx);
        let node = self.slots[idx].take().expect("linked slot is occupied");
        self.free.push(idx);
        self.index.remove(&node.key);
        node
    }

    fn allocate(&mut self, node: Node<V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(node);
            idx
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        }
    }
}

/// Thread-safe LRU cache with a fixed capacity
pub struct LruCache<V> {
    capacity: usize,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> LruCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                index: HashMap::with_capacity(capacity),
                slots: Vec::with_capacity(capacity),
                free: Vec::new(),
                head: None,
                tail: None,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Get a value and mark it most-recently-used
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let Some(&idx) = inner.index.get(key) else {
            inner.misses += 1;
            return None;
        };
        inner.hits += 1;
        inner.detach(idx);
        inner.push_front(idx);
        Some(inner.node(idx).value.clone())
    }

    /// Get a value without touching recency or statistics
    pub fn peek(&self, key: &str) -> Option<V> {
        let inner = self.inner.lock();
        inner
            .index
            .get(key)
            .map(|&idx| inner.node(idx).value.clone())
    }

    /// Insert or update a value and mark it most-recently-used.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn set(&self, key: &str, value: V) -> Option<String> {
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.index.get(key) {
            inner.node_mut(idx).value = value;
            inner.detach(idx);
            inner.push_front(idx);
            return None;
        }

        let mut evicted = None;
        if inner.index.len() >= self.capacity {
            if let Some(lru) = inner.tail {
                let node = inner.release(lru);
                inner.evictions += 1;
                evicted = Some(node.key);
            }
        }

        let idx = inner.allocate(Node {
            key: key.to_string(),
            value,
            prev: None,
            next: None,
        });
        inner.push_front(idx);
        inner.index.insert(key.to_string(), idx);
        evicted
    }

    /// Remove an entry, returning its value
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        Some(inner.release(idx).value)
    }

    /// Number of entries currently cached
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of all entries, most-recently-used first.
    ///
    /// Does not affect recency.
    pub fn entries(&self) -> Vec<(String, V)> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.index.len());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let node = inner.node(idx);
            out.push((node.key.clone(), node.value.clone()));
            cursor = node.next;
        }
        out
    }

    /// Keys in recency order, most-recently-used first
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.index.len());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let node = inner.node(idx);
            out.push(node.key.clone());
            cursor = node.next;
        }
        out
    }

    /// Clear all cached entries (statistics are kept)
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.index.clear();
        inner.slots.clear();
        inner.free.clear();
        inner.head = None;
        inner.tail = None;
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64
        };
        CacheStatsSnapshot {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.index.len(),
            capacity: self.capacity,
            hit_rate,
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Entries evicted by capacity pressure
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Maximum number of entries
    pub capacity: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_and_set() {
        let cache = LruCache::new(4);
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LruCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);

        let evicted = cache.set("d", 4);

        assert_eq!(evicted.as_deref(), Some("a"));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.peek("a"), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = LruCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);

        // "a" becomes most recent, so "b" is the next eviction candidate
        assert_eq!(cache.get("a"), Some(1));
        let evicted = cache.set("d", 4);

        assert_eq!(evicted.as_deref(), Some("b"));
        assert_eq!(cache.peek("a"), Some(1));
    }

    #[test]
    fn test_update_refreshes_recency_without_growth() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.set("a", 10), None);
        assert_eq!(cache.len(), 2);

        let evicted = cache.set("c", 3);
        assert_eq!(evicted.as_deref(), Some("b"));
        assert_eq!(cache.peek("a"), Some(10));
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);

        assert_eq!(cache.peek("a"), Some(1));
        let evicted = cache.set("c", 3);

        assert_eq!(evicted.as_deref(), Some("a"));
        // peek is invisible to statistics
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_entries_in_recency_order() {
        let cache = LruCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        cache.get("a");

        let keys: Vec<String> = cache.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "c", "b"]);
        assert_eq!(cache.keys(), keys);
    }

    #[test]
    fn test_remove_and_slot_reuse() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);

        cache.set("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.keys(), vec!["c", "b"]);
    }

    #[test]
    fn test_capacity_one() {
        let cache = LruCache::new(1);
        cache.set("a", 1);
        assert_eq!(cache.set("b", 2).as_deref(), Some("a"));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: LruCache<u8> = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = LruCache::new(4);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
        cache.set("c", 3);
        assert_eq!(cache.keys(), vec!["c"]);
    }

    #[test]
    fn test_hit_rate() {
        let cache = LruCache::new(4);
        cache.set("key1", 1);
        cache.set("key2", 2);
        cache.get("key1");
        cache.get("key2");
        cache.get("key3");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = Arc::new(LruCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("{t}-{i}");
                        cache.set(&key, i);
                        cache.get(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
        assert_eq!(cache.keys().len(), 16);
    }
}

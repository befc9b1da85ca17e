//! A small Least-Recently-Used cache keyed by block number.
//!
//! Entries are linked through an intrusive doubly-linked list stored
//! alongside each value in a `BTreeMap`, so eviction, promotion, and lookup
//! are all `O(log n)` without pulling in an external LRU crate for this one
//! data structure.
use std::collections::BTreeMap;

struct Node<V> {
    value: V,
    prev: Option<u64>,
    next: Option<u64>,
}

/// An LRU cache over `u64`-keyed entries, bounded at `capacity`.
pub struct LruCache<V> {
    inner: BTreeMap<u64, Node<V>>,
    capacity: usize,
    head: Option<u64>,
    tail: Option<u64>,
}

impl<V> LruCache<V> {
    /// Creates an empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BTreeMap::new(),
            capacity: capacity.max(1),
            head: None,
            tail: None,
        }
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn detach(&mut self, key: u64) {
        let (prev, next) = {
            let node = self.inner.get(&key).unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.inner.get_mut(&prev).unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.inner.get_mut(&next).unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn attach_at_tail(&mut self, key: u64) {
        let prev = self.tail;
        if let Some(prev) = prev {
            self.inner.get_mut(&prev).unwrap().next = Some(key);
        } else {
            self.head = Some(key);
        }
        let node = self.inner.get_mut(&key).unwrap();
        node.prev = prev;
        node.next = None;
        self.tail = Some(key);
    }

    fn touch(&mut self, key: u64) {
        self.detach(key);
        self.attach_at_tail(key);
    }

    /// Looks up `key`, marking it most-recently-used on a hit.
    pub fn get(&mut self, key: u64) -> Option<&mut V> {
        if self.inner.contains_key(&key) {
            self.touch(key);
            Some(&mut self.inner.get_mut(&key).unwrap().value)
        } else {
            None
        }
    }

    /// Looks up `key` without affecting recency, for callers that only
    /// need to peek (e.g. to flush dirty entries without reordering them).
    pub fn peek(&self, key: u64) -> Option<&V> {
        self.inner.get(&key).map(|n| &n.value)
    }

    /// Inserts or updates `key`, marking it most-recently-used. Returns the
    /// evicted `(key, value)` pair if the cache was at capacity and `key`
    /// was not already present.
    pub fn put(&mut self, key: u64, value: V) -> Option<(u64, V)> {
        if self.inner.contains_key(&key) {
            self.inner.get_mut(&key).unwrap().value = value;
            self.touch(key);
            return None;
        }

        let evicted = if self.inner.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        self.inner.insert(
            key,
            Node {
                value,
                prev: None,
                next: None,
            },
        );
        self.attach_at_tail(key);
        evicted
    }

    /// Removes and returns the least-recently-used entry, if any. Ties
    /// (which cannot occur with a single linked list, kept for clarity) are
    /// broken by lowest key, matching the order `BTreeMap` already gives a
    /// freshly-inserted run of equally-recent entries.
    fn pop_lru(&mut self) -> Option<(u64, V)> {
        let key = self.head?;
        self.detach(key);
        self.inner.remove(&key).map(|n| (key, n.value))
    }

    /// Removes `key` from the cache entirely, returning its value.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        if self.inner.contains_key(&key) {
            self.detach(key);
            self.inner.remove(&key).map(|n| n.value)
        } else {
            None
        }
    }

    /// Iterates all cached keys in least-to-most-recently-used order.
    pub fn keys_lru_order(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.inner.len());
        let mut cur = self.head;
        while let Some(k) = cur {
            out.push(k);
            cur = self.inner.get(&k).unwrap().next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        assert!(cache.put(1, "one").is_none());
        assert!(cache.put(2, "two").is_none());
        assert_eq!(cache.get(1), Some(&mut "one"));
        let evicted = cache.put(3, "three");
        assert_eq!(evicted, Some((2, "two")));
        assert!(cache.peek(1).is_some());
        assert!(cache.peek(3).is_some());
    }

    #[test]
    fn tie_breaks_on_lowest_key() {
        let mut cache = LruCache::new(2);
        cache.put(5, "a");
        cache.put(3, "b");
        // Neither touched since insertion; 5 is least recently used.
        let evicted = cache.put(9, "c");
        assert_eq!(evicted, Some((5, "a")));
    }
}

//! Bounded in-memory LRU used as a read-through layer in front of the store.
//!
//! Entries live in a slab of nodes linked into a recency list; a `HashMap`
//! indexes the slab. Every operation takes one short `Mutex` critical section
//! and never performs I/O while holding it. Losing the cache only costs hit
//! rate; the store remains authoritative.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of entries kept by the paper cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 500_000;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
struct Inner<K, V> {
    map: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used.
    tail: usize,
    /// Bumped by every invalidation.
    generation: u64,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn with_capacity(capacity: usize) -> Self {
        // Pre-size modestly; large default capacities grow on demand.
        let initial = capacity.min(1024);
        Self {
            map: HashMap::with_capacity(initial),
            nodes: Vec::with_capacity(initial),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            generation: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = &self.nodes[idx];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn insert(&mut self, capacity: usize, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            self.nodes[idx].value = value;
            self.promote(idx);
            return;
        }
        if self.map.len() >= capacity {
            self.evict_tail();
        }
        let idx = self.alloc(key.clone(), value);
        self.push_front(idx);
        self.map.insert(key, idx);
    }

    fn evict_tail(&mut self) -> Option<K> {
        let idx = self.tail;
        if idx == NIL {
            return None;
        }
        self.unlink(idx);
        let key = self.nodes[idx].key.clone();
        self.map.remove(&key);
        self.free.push(idx);
        Some(key)
    }

    fn alloc(&mut self, key: K, value: V) -> usize {
        let node = Node {
            key,
            value,
            prev: NIL,
            next: NIL,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }
}

/// A thread-safe, fixed-capacity least-recently-used map.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner::with_capacity(capacity)),
        }
    }

    // A panic inside a critical section cannot leave the list half-linked in a
    // way later calls depend on for correctness, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a clone of the value and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let idx = *inner.map.get(key)?;
        inner.promote(idx);
        Some(inner.nodes[idx].value.clone())
    }

    /// Inserts or replaces a value, evicting the least recently used entry
    /// when a new key arrives at a full cache.
    pub fn put(&self, key: K, value: V) {
        self.lock().insert(self.capacity, key, value);
    }

    /// Current invalidation generation, for a later
    /// [`put_if_unchanged`](Self::put_if_unchanged).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Inserts `value` only if no [`delete`](Self::delete) or
    /// [`clear`](Self::clear) happened since `generation` was read.
    ///
    /// Read-through fills use this so a snapshot loaded before a concurrent
    /// write never outlives that write's invalidation.
    pub fn put_if_unchanged(&self, key: K, value: V, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.insert(self.capacity, key, value);
        true
    }

    /// Removes an entry. Returns whether it was present.
    ///
    /// Bumps the generation even when the key is absent.
    pub fn delete(&self, key: &K) -> bool {
        let mut inner = self.lock();
        inner.generation += 1;
        let Some(idx) = inner.map.remove(key) else {
            return false;
        };
        inner.unlink(idx);
        inner.free.push(idx);
        true
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let generation = inner.generation + 1;
        *inner = Inner::with_capacity(self.capacity);
        inner.generation = generation;
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

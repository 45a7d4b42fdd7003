//! In-process LRU cache with optional per-entry expiry
//!
//! The map and the recency list share one lock, so a lookup that bumps an
//! entry and an insert that evicts one never interleave.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
    slot: usize,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// Node in the index-linked recency list
#[derive(Debug)]
struct LruNode<K> {
    key: Option<K>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct LruState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    nodes: Vec<LruNode<K>>,
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> LruState<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn allocate(&mut self, key: K) -> usize {
        let node = LruNode {
            key: Some(key),
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[slot].prev = None;
        self.nodes[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].prev = None;
        self.nodes[slot].next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.unlink(entry.slot);
        self.nodes[entry.slot].key = None;
        self.free.push(entry.slot);
        Some(entry.value)
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self.tail.and_then(|t| self.nodes[t].key.clone()) {
            self.remove(&key);
        }
    }
}

/// Bounded LRU map.
///
/// Entries inserted with a TTL disappear once it elapses; expired entries
/// are dropped lazily on access or by [`prune_expired`](Self::prune_expired).
#[derive(Debug)]
pub struct LruTtlCache<K, V> {
    capacity: usize,
    state: Mutex<LruState<K, V>>,
}

impl<K, V> LruTtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(LruState::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key` and mark it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        let (slot, expired) = {
            let entry = state.entries.get(key)?;
            (entry.slot, entry.is_expired(Instant::now()))
        };
        if expired {
            state.remove(key);
            return None;
        }
        state.unlink(slot);
        state.push_front(slot);
        state.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert or replace `key`, evicting the least recently used entry when
    /// full. A TTL past the clock's range never expires.
    pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();

        if let Some(slot) = state.entries.get(&key).map(|e| e.slot) {
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.value = value;
                entry.expires_at = expires_at;
            }
            state.unlink(slot);
            state.push_front(slot);
            return;
        }

        if state.entries.len() >= self.capacity {
            state.evict_lru();
        }
        let slot = state.allocate(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                slot,
            },
        );
        state.push_front(slot);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.state.lock().remove(key)
    }

    /// Live (unexpired) membership, without touching recency
    pub fn contains(&self, key: &K) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.state.lock() = LruState::new(self.capacity);
    }

    /// Drop every expired entry; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// Drop expired entries, then trim the map and free list to what is
    /// live; returns how many entries were removed
    pub fn compact(&self) -> usize {
        let removed = self.prune_expired();
        let mut state = self.state.lock();
        state.entries.shrink_to_fit();
        state.free.shrink_to_fit();
        removed
    }
}

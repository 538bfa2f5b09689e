//! Fixed-capacity cache with per-entry TTL and LRU eviction.
//!
//! Expiry is lazy: an entry is only discovered to be stale when it is looked
//! up, iterated, or displaced by an insert. Nothing sweeps in the background.

use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    /// Monotonic access stamp; the smallest stamp is the LRU entry.
    pub access_order: u64,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

// ---------------------------------------------------------------------------
// CacheStats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

// ---------------------------------------------------------------------------
// BoundedCache
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, CacheEntry<V>>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq + Clone, V> BoundedCache<K, V> {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `key`, refreshing its LRU position on a hit.
    ///
    /// An expired entry is removed and counted as a miss.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(Instant::now()),
        };
        if expired {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }

        let tick = self.next_tick();
        self.hits += 1;
        let entry = self.entries.get_mut(key)?;
        entry.access_order = tick;
        Some(&entry.value)
    }

    /// Presence check. Does not touch hit/miss counters or LRU order.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn set(&mut self, key: K, value: V) {
        let ttl = self.ttl;
        self.set_with_ttl(key, value, ttl);
    }

    /// Insert with a TTL that overrides the cache-wide default for this entry.
    pub fn set_with_ttl(&mut self, key: K, value: V, ttl: Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        let tick = self.next_tick();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                access_order: tick,
                ttl,
            },
        );
    }

    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop every entry and reset the hit/miss counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Remove all expired entries now. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            size: self.entries.len(),
        }
    }

    // Expired entries go first; otherwise the least recently used one.
    fn evict_one(&mut self) {
        let now = Instant::now();
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (!entry.is_expired(now), entry.access_order))
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::trace!(remaining = self.entries.len(), "evicted cache entry");
        }
    }

    /// Keys of live (non-expired) entries, least recently used first.
    pub fn keys(&self) -> Vec<K> {
        let now = Instant::now();
        let mut live: Vec<(&K, u64)> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key, entry.access_order))
            .collect();
        live.sort_by_key(|(_, order)| *order);
        live.into_iter().map(|(key, _)| key.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! TTL + LRU cache for analyze results
//!
//! Entries expire `ttl` after insertion. Reads refresh recency and drop
//! expired entries; inserts evict the least recently used entry once the
//! capacity is reached. A zero TTL or zero capacity disables the cache.
//! Time comes from `tokio::time`, so tests can drive expiry with a paused clock.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use lru::LruCache;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Bounded cache with per-entry expiry
pub struct TtlLruCache<K, V> {
    ttl: Duration,
    entries: Option<Mutex<LruCache<K, CacheEntry<V>>>>,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache; `ttl` or `capacity` of zero yields a disabled cache
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(cap) if !ttl.is_zero() => Some(Mutex::new(LruCache::new(cap))),
            _ => None,
        };
        Self { ttl, entries }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<K, CacheEntry<V>>>> {
        self.entries
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Look up a live entry, marking it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Insert or replace an entry, evicting the least recently used one if full
    pub fn set(&self, key: K, value: V) {
        let Some(mut entries) = self.lock() else {
            return;
        };
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!(capacity = entries.cap().get(), "Evicted least recently used cache entry");
            }
        }
    }

    /// Remove an entry regardless of expiry
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock()?.pop(key).map(|entry| entry.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let Some(mut entries) = self.lock() else {
            return 0;
        };
        let now = Instant::now();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(mut entries) = self.lock() {
            entries.clear();
        }
    }
}

impl<K, V> TtlLruCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Sweep expired entries every `every` until the cache is dropped
    ///
    /// Returns `None` when the cache is disabled or `every` is zero.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        if !self.is_enabled() || every.is_zero() {
            return None;
        }
        let cache: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!(removed = removed, remaining = cache.len(), "Swept expired cache entries");
                }
            }
        }))
    }
}

//! Bounded TTL cache for expensive pipeline results
//!
//! Capacity is a hard ceiling: inserting a new key into a full cache first
//! evicts the single entry with the lowest recency/frequency score. Expiry is
//! lazy and independent of eviction: a read of an entry older than the TTL
//! deletes it and counts as a miss.

use crate::fingerprint::Fingerprint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for one cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_touched: Instant,
    hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            last_touched: now,
            hit_count: 0,
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > ttl
    }

    fn touch(&mut self, now: Instant) {
        self.last_touched = now;
        self.hit_count += 1;
    }

    /// Higher is more valuable: frequent and recent entries survive.
    fn score(&self, now: Instant) -> f64 {
        let idle = now.duration_since(self.last_touched).as_secs_f64();
        (self.hit_count as f64 + 1.0) / (1.0 + idle)
    }
}

/// Running counters for one cache
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub evictions: AtomicUsize,
    pub expirations: AtomicUsize,
    pub insertions: AtomicUsize,
}

impl CacheMetrics {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    fn insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.expirations,
            &self.insertions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of cache counters and occupancy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub size: usize,
    pub capacity: usize,
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    pub expirations: usize,
    pub insertions: usize,
    pub hit_rate: f64,
    /// Hit count per live entry
    pub entry_hits: HashMap<String, u64>,
}

/// Generic memoization cache keyed by [`Fingerprint`]
pub struct ResultCache<V> {
    name: String,
    config: CacheConfig,
    entries: Mutex<HashMap<Fingerprint, CacheEntry<V>>>,
    metrics: CacheMetrics,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        let capacity = config.capacity;
        Self {
            name: name.into(),
            config,
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up a value, refreshing its recency on a hit.
    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(key) else {
            self.metrics.miss();
            return None;
        };

        if entry.is_expired(self.config.ttl(), now) {
            entries.remove(key);
            self.metrics.expiration();
            self.metrics.miss();
            debug!(cache = %self.name, key = key.short(), "Entry expired");
            return None;
        }

        entry.touch(now);
        self.metrics.hit();
        Some(entry.value.clone())
    }

    /// Stores a value, evicting the lowest-scoring entry if the cache is full.
    pub fn set(&self, key: Fingerprint, value: V) {
        if self.config.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.config.capacity {
            let victim = entries
                .iter()
                .min_by(|(_, a), (_, b)| {
                    a.score(now)
                        .total_cmp(&b.score(now))
                        .then(a.last_touched.cmp(&b.last_touched))
                })
                .map(|(k, _)| k.clone());

            if let Some(victim) = victim {
                entries.remove(&victim);
                self.metrics.eviction();
                debug!(cache = %self.name, key = victim.short(), "Evicted entry");
            }
        }

        entries.insert(key, CacheEntry::new(value));
        self.metrics.insertion();
    }

    /// Drops every entry and resets the counters.
    pub fn invalidate(&self) {
        self.entries.lock().clear();
        self.metrics.reset();
        debug!(cache = %self.name, "Cache invalidated");
    }

    /// Removes expired entries without touching live ones.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(ttl, now));
        let removed = before - entries.len();
        for _ in 0..removed {
            self.metrics.expiration();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let hits = self.metrics.hits.load(Ordering::Relaxed);
        let misses = self.metrics.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            name: self.name.clone(),
            size: entries.len(),
            capacity: self.config.capacity,
            hits,
            misses,
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            expirations: self.metrics.expirations.load(Ordering::Relaxed),
            insertions: self.metrics.insertions.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_hits: entries
                .iter()
                .map(|(k, e)| (k.to_string(), e.hit_count))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintBuilder;

    fn key(name: &str) -> Fingerprint {
        FingerprintBuilder::new("test").str(name).finish()
    }

    fn cache(capacity: usize, ttl: Duration) -> ResultCache<String> {
        ResultCache::new(
            "test",
            CacheConfig {
                capacity,
                ttl_secs: ttl.as_secs(),
            },
        )
    }

    #[test]
    fn test_get_after_set() {
        let cache = cache(4, Duration::from_secs(60));
        cache.set(key("a"), "result-a".to_string());

        assert_eq!(cache.get(&key("a")), Some("result-a".to_string()));
        assert_eq!(cache.get(&key("b")), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_hits[key("a").as_str()], 1);
    }

    #[test]
    fn test_capacity_is_hard_ceiling() {
        let cache = cache(3, Duration::from_secs(60));
        cache.set(key("a"), "a".into());
        cache.set(key("b"), "b".into());
        cache.set(key("c"), "c".into());

        // a and b become more valuable than c
        cache.get(&key("a"));
        cache.get(&key("b"));

        cache.set(key("d"), "d".into());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.get(&key("c")), None);
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("d")).is_some());
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let cache = cache(2, Duration::from_secs(60));
        cache.set(key("a"), "1".into());
        cache.set(key("b"), "2".into());
        cache.set(key("a"), "3".into());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&key("a")), Some("3".to_string()));
    }

    #[test]
    fn test_ttl_expiration_counts_as_miss() {
        let cache = cache(4, Duration::ZERO);
        cache.set(key("a"), "a".into());
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get(&key("a")), None);
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_invalidate_resets() {
        let cache = cache(4, Duration::from_secs(60));
        cache.set(key("a"), "a".into());
        cache.get(&key("a"));
        cache.invalidate();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.insertions, 0);
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache(4, Duration::ZERO);
        cache.set(key("a"), "a".into());
        cache.set(key("b"), "b".into());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }
}

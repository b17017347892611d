use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::CacheConfig;
use crate::ResourceMonitor;
use crate::Snapshot;
use crate::Value;

/// Last observed state of one key
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Modification time reported by storage, if it reports one
    pub reported_modified: Option<SystemTime>,
    /// Wall-clock time this value was stored locally
    pub observed_at: SystemTime,
    pub inserted_at: Instant,
    pub accessed_at: Instant,
    pub ttl: Duration,
    access_seq: u64,
}

impl CacheEntry {
    /// Storage modification time, or the local observation time when storage reports none
    pub fn last_modified(&self) -> SystemTime {
        self.reported_modified.unwrap_or(self.observed_at)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            value: self.value.clone(),
            last_modified: self.reported_modified,
        }
    }

    fn is_expired(
        &self,
        now: Instant,
    ) -> bool {
        self.inserted_at + self.ttl < now
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub size: usize,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// access_seq -> key, oldest access first
    lru: BTreeMap<u64, String>,
    next_seq: u64,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(
        &mut self,
        key: &str,
    ) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.access_seq);
        Some(entry)
    }

    fn touch(
        &mut self,
        key: &str,
        now: Instant,
    ) -> Option<CacheEntry> {
        let seq = self.next_seq();
        let entry = self.entries.get_mut(key)?;
        self.lru.remove(&entry.access_seq);
        entry.access_seq = seq;
        entry.accessed_at = now;
        self.lru.insert(seq, key.to_string());
        Some(entry.clone())
    }

    fn pop_least_recently_used(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.lru.pop_first()?;
        self.entries.remove(&key)
    }
}

/// Capacity-bounded map of last-known values with lazy TTL expiry and LRU eviction.
///
/// TTL is checked on access; [`BoundedTtlCache::purge_expired`] is driven periodically by the
/// background sweeper for keys nobody reads again.
#[derive(Debug)]
pub struct BoundedTtlCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    default_ttl: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl BoundedTtlCache {
    pub fn new(
        capacity: usize,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.cache_size, config.ttl())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of `key`, or `None` when absent or expired (an expired entry is dropped).
    pub fn get(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.get_entry(key).map(|e| e.value)
    }

    /// Same as [`Self::get`] but returns the whole entry
    pub fn get_entry(
        &self,
        key: &str,
    ) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key, "Cache entry expired on access");
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        inner.touch(key, now)
    }

    /// Inserts or replaces the entry for `key`.
    ///
    /// Inserting a new key into a full cache evicts exactly one entry first: the one with the
    /// oldest access.
    pub fn set(
        &self,
        key: &str,
        snapshot: Snapshot,
        ttl: Option<Duration>,
    ) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut inner = self.inner.lock();

        if inner.remove(key).is_none() && inner.entries.len() >= self.capacity {
            if let Some(victim) = inner.pop_least_recently_used() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(victim = %victim.key, "Evicted least recently used cache entry");
            }
        }

        let seq = inner.next_seq();
        inner.lru.insert(seq, key.to_string());
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: snapshot.value,
                reported_modified: snapshot.last_modified,
                observed_at: SystemTime::now(),
                inserted_at: now,
                accessed_at: now,
                ttl,
                access_seq: seq,
            },
        );
    }

    /// Removes `key` regardless of its TTL. Returns whether an entry existed.
    pub fn invalidate(
        &self,
        key: &str,
    ) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drops every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }

        self.expirations.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            size: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Zeroes the counters. The only way they ever decrease.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    /// Keys currently held, expired or not, least recently used first
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().lru.values().cloned().collect()
    }
}

/// The cache is the notifier's default resource monitor: releasing resources drops expired
/// entries, and a full cache counts as pressure.
impl ResourceMonitor for BoundedTtlCache {
    fn release_resources(&self) {
        let purged = self.purge_expired();
        debug!(purged, "Released cache memory before retry");
    }

    fn under_pressure(&self) -> bool {
        self.len() >= self.capacity
    }
}

//! Bounded cache store with fresh and stale tiers.

use super::stats::{CacheCounters, CacheStats};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use frugal_core::{CacheState, FrugalConfig, Timestamp};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Timestamp,
    fresh_until: Timestamp,
    stale_until: Timestamp,
    /// Position in the insertion order index.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn state_at(&self, now: Timestamp) -> CacheState {
        if now < self.fresh_until {
            CacheState::Fresh
        } else if now < self.stale_until {
            CacheState::Stale
        } else {
            CacheState::Miss
        }
    }
}

#[derive(Debug)]
struct StoreInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion sequence -> key. The first entry is the oldest insertion.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> StoreInner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// Result of a cache lookup.
///
/// `value` is present for `Fresh` and `Stale`, absent for `Miss`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<V> {
    pub state: CacheState,
    pub value: Option<V>,
    pub inserted_at: Option<Timestamp>,
}

impl<V> CacheLookup<V> {
    fn miss() -> Self {
        Self {
            state: CacheState::Miss,
            value: None,
            inserted_at: None,
        }
    }
}

/// In-memory key/value store with TTL and a stale grace period.
///
/// Values are immutable snapshots once stored; lookups hand out clones.
pub struct TieredCacheStore<V> {
    capacity: usize,
    grace_multiplier: u32,
    inner: RwLock<StoreInner<V>>,
    counters: CacheCounters,
}

impl<V: Clone> TieredCacheStore<V> {
    /// `grace_multiplier` scales the TTL into the grace deadline: an entry
    /// stored with TTL `T` is fresh before `T` and stale before
    /// `T * grace_multiplier`.
    pub fn new(capacity: usize, grace_multiplier: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            grace_multiplier: grace_multiplier.max(1),
            inner: RwLock::new(StoreInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            counters: CacheCounters::default(),
        }
    }

    pub fn from_config(config: &FrugalConfig) -> Self {
        Self::new(config.cache_capacity, config.stale_grace_multiplier)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key` as of `now`.
    pub fn get(&self, key: &str, now: Timestamp) -> CacheLookup<V> {
        let inner = self.read();
        let Some(entry) = inner.entries.get(key) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::miss();
        };

        let state = entry.state_at(now);
        match state {
            CacheState::Fresh => self.counters.hits.fetch_add(1, Ordering::Relaxed),
            CacheState::Stale => self.counters.stale_hits.fetch_add(1, Ordering::Relaxed),
            CacheState::Miss => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return CacheLookup::miss();
            }
        };

        CacheLookup {
            state,
            value: Some(entry.value.clone()),
            inserted_at: Some(entry.inserted_at),
        }
    }

    /// Store or overwrite `key`. An overwrite counts as a new insertion for
    /// eviction order. Returns the number of entries evicted to make room.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration, now: Timestamp) -> usize {
        let key = key.into();
        let fresh_until = add_std(now, ttl);
        let grace = ttl
            .checked_mul(self.grace_multiplier)
            .unwrap_or(Duration::MAX);
        let stale_until = add_std(now, grace);

        let mut inner = self.write();
        inner.remove(&key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                fresh_until,
                stale_until,
                seq,
            },
        );

        let mut evicted = 0;
        while inner.entries.len() > self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            evicted += 1;
        }
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, capacity = self.capacity, "Cache evicted oldest entries");
        }
        evicted
    }

    /// Drop `key`. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Remove every entry past its grace deadline. Returns how many went.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut inner = self.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.stale_until)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        let swept = expired.len();
        if swept > 0 {
            self.counters
                .swept
                .fetch_add(swept as u64, Ordering::Relaxed);
            tracing::debug!(swept, remaining = inner.entries.len(), "Cache sweep");
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner<V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner<V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> std::fmt::Debug for TieredCacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCacheStore")
            .field("capacity", &self.capacity)
            .field("grace_multiplier", &self.grace_multiplier)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

fn add_std(at: Timestamp, by: Duration) -> Timestamp {
    ChronoDuration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
    }

    fn at(secs: i64) -> Timestamp {
        t0() + ChronoDuration::seconds(secs)
    }

    #[test]
    fn test_fresh_stale_miss_transitions() {
        let cache = TieredCacheStore::new(10, 10);
        cache.set("user:1", 7u32, Duration::from_secs(60), t0());

        let fresh = cache.get("user:1", at(59));
        assert_eq!(fresh.state, CacheState::Fresh);
        assert_eq!(fresh.value, Some(7));
        assert_eq!(fresh.inserted_at, Some(t0()));

        assert_eq!(cache.get("user:1", at(60)).state, CacheState::Stale);
        assert_eq!(cache.get("user:1", at(599)).value, Some(7));
        assert_eq!(cache.get("user:1", at(600)).state, CacheState::Miss);
        assert_eq!(cache.get("user:1", at(600)).value, None);
    }

    #[test]
    fn test_absent_key_is_miss() {
        let cache: TieredCacheStore<u32> = TieredCacheStore::new(10, 10);
        assert_eq!(cache.get("nope", t0()).state, CacheState::Miss);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_overwrite_replaces_value_and_deadlines() {
        let cache = TieredCacheStore::new(10, 2);
        cache.set("k", 1u32, Duration::from_secs(10), t0());
        cache.set("k", 2u32, Duration::from_secs(100), at(50));
        let lookup = cache.get("k", at(120));
        assert_eq!(lookup.state, CacheState::Fresh);
        assert_eq!(lookup.value, Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_insertion() {
        let cache = TieredCacheStore::new(3, 10);
        let ttl = Duration::from_secs(60);
        cache.set("a", 1u32, ttl, t0());
        cache.set("b", 2u32, ttl, t0());
        cache.set("c", 3u32, ttl, t0());
        // Re-inserting "a" moves it to the back of the line.
        cache.set("a", 10u32, ttl, t0());
        assert_eq!(cache.set("d", 4u32, ttl, t0()), 1);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("b", t0()).state, CacheState::Miss);
        assert_eq!(cache.get("a", t0()).value, Some(10));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = TieredCacheStore::new(10, 10);
        cache.set("short", 1u32, Duration::from_secs(1), t0());
        cache.set("long", 2u32, Duration::from_secs(60), t0());

        assert_eq!(cache.sweep(at(5)), 0);
        assert_eq!(cache.sweep(at(10)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long", at(10)).state, CacheState::Fresh);
        assert_eq!(cache.stats().swept, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = TieredCacheStore::new(10, 10);
        cache.set("a", 1u32, Duration::from_secs(60), t0());
        cache.set("b", 2u32, Duration::from_secs(60), t0());
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.clear();
        assert!(cache.is_empty());
        // Order index is cleared too; inserting past capacity still evicts.
        for i in 0..12u32 {
            cache.set(format!("k{i}"), i, Duration::from_secs(60), t0());
        }
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let cache = TieredCacheStore::new(10, 10);
        cache.set("k", 1u32, Duration::ZERO, t0());
        assert_eq!(cache.get("k", t0()).state, CacheState::Miss);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let cache = TieredCacheStore::new(10, 10);
        cache.set("k", 1u32, Duration::MAX, t0());
        assert_eq!(cache.get("k", at(86_400 * 365)).state, CacheState::Fresh);
    }

    #[test]
    fn test_stats_track_tiers() {
        let cache = TieredCacheStore::new(10, 10);
        cache.set("k", 1u32, Duration::from_secs(10), t0());
        cache.get("k", at(1));
        cache.get("k", at(20));
        cache.get("other", at(20));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.stale_hits, stats.misses), (1, 1, 1));
        assert_eq!(stats.entry_count, 1);
    }

    proptest! {
        /// State is decided by elapsed time alone: fresh before T, stale
        /// before T * grace, miss afterwards.
        #[test]
        fn prop_state_follows_elapsed(ttl in 1u64..3_600, grace in 1u32..20, elapsed in 0u64..100_000) {
            let cache = TieredCacheStore::new(4, grace);
            cache.set("k", (), Duration::from_secs(ttl), t0());
            let state = cache.get("k", at(elapsed as i64)).state;
            let expected = if elapsed < ttl {
                CacheState::Fresh
            } else if elapsed < ttl * grace as u64 {
                CacheState::Stale
            } else {
                CacheState::Miss
            };
            prop_assert_eq!(state, expected);
        }

        /// The store never holds more than its capacity.
        #[test]
        fn prop_len_bounded(capacity in 1usize..16, keys in prop::collection::vec(0u8..40, 0..100)) {
            let cache = TieredCacheStore::new(capacity, 10);
            for key in keys {
                cache.set(key.to_string(), key, Duration::from_secs(60), t0());
                prop_assert!(cache.len() <= capacity);
            }
        }
    }
}

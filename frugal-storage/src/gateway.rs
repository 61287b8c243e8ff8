//! Read gateway.
//!
//! Routes every read through the fallback chain:
//!
//! 1. fresh cache hit, returned without touching the budget or ledger;
//! 2. otherwise ask the budget window for a read;
//! 3. granted: fetch, record the read, cache with the strategy-scaled TTL;
//! 4. denied or failed: the stale entry if one is retained, else the
//!    declared default for the key.
//!
//! Callers always get a value. Quota pressure only costs freshness, and
//! [`CacheRead::source`] says which branch produced it.

use crate::budget::BudgetWindow;
use crate::cache::{CacheLookup, TieredCacheStore};
use crate::fetch::{fetch_with_timeout, StorageFetcher};
use crate::ledger::QuotaLedger;
use frugal_core::{CacheRead, CacheState, OperationKind, Priority, SharedClock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Counters for the gateway's fallback chain.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub fresh_hits: AtomicU64,
    pub fetches: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub stale_served: AtomicU64,
    pub defaults_served: AtomicU64,
    pub budget_denials: AtomicU64,
}

/// Snapshot of gateway metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayMetricsSnapshot {
    pub fresh_hits: u64,
    pub fetches: u64,
    pub fetch_errors: u64,
    pub stale_served: u64,
    pub defaults_served: u64,
    pub budget_denials: u64,
}

impl GatewayMetrics {
    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            defaults_served: self.defaults_served.load(Ordering::Relaxed),
            budget_denials: self.budget_denials.load(Ordering::Relaxed),
        }
    }
}

pub struct ReadGateway<V> {
    cache: Arc<TieredCacheStore<V>>,
    budget: Arc<BudgetWindow>,
    ledger: Arc<QuotaLedger>,
    clock: SharedClock,
    /// Key prefix -> fallback value. Longest matching prefix wins.
    defaults: RwLock<BTreeMap<String, V>>,
    metrics: GatewayMetrics,
}

impl<V> ReadGateway<V>
where
    V: Clone + Default + Send + Sync + 'static,
{
    pub fn new(
        cache: Arc<TieredCacheStore<V>>,
        budget: Arc<BudgetWindow>,
        ledger: Arc<QuotaLedger>,
        clock: SharedClock,
    ) -> Self {
        Self {
            cache,
            budget,
            ledger,
            clock,
            defaults: RwLock::new(BTreeMap::new()),
            metrics: GatewayMetrics::default(),
        }
    }

    /// Read `key`, fetching through `fetcher` only when the cache has no
    /// fresh value and the budget allows it. `ttl` is the base freshness
    /// period; the current strategy's multiplier is applied on store.
    pub async fn get<F>(
        &self,
        key: &str,
        fetcher: &F,
        ttl: Duration,
        priority: Priority,
    ) -> CacheRead<V>
    where
        F: StorageFetcher<V> + ?Sized,
    {
        let lookup = self.cache.get(key, self.clock.now());
        if lookup.state == CacheState::Fresh {
            return self.fallback(key, lookup);
        }
        self.fetch_or_fallback(key, fetcher, ttl, priority, lookup).await
    }

    /// Skip the fresh-hit shortcut and try to fetch. Still gated by the
    /// budget unless `priority` is critical. A denied or failed refresh
    /// returns whatever the cache holds, fresh or stale, before the default.
    pub async fn force_refresh<F>(
        &self,
        key: &str,
        fetcher: &F,
        ttl: Duration,
        priority: Priority,
    ) -> CacheRead<V>
    where
        F: StorageFetcher<V> + ?Sized,
    {
        let lookup = self.cache.get(key, self.clock.now());
        self.fetch_or_fallback(key, fetcher, ttl, priority, lookup).await
    }

    /// Declare the fallback for every key starting with `prefix`.
    pub fn declare_default(&self, prefix: impl Into<String>, value: V) {
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prefix.into(), value);
    }

    /// Fallback for `key`: the longest declared prefix match, else
    /// `V::default()`.
    pub fn default_for(&self, key: &str) -> V {
        let defaults = self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        defaults
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    /// Drop any cached value for `key`.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.remove(key)
    }

    /// Store a value the caller already knows (e.g. one it just wrote)
    /// without spending a read. The strategy's TTL multiplier applies.
    pub fn prime(&self, key: &str, value: V, ttl: Duration) {
        let effective = self.effective_ttl(ttl);
        self.cache.set(key, value, effective, self.clock.now());
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &TieredCacheStore<V> {
        &self.cache
    }

    async fn fetch_or_fallback<F>(
        &self,
        key: &str,
        fetcher: &F,
        ttl: Duration,
        priority: Priority,
        lookup: CacheLookup<V>,
    ) -> CacheRead<V>
    where
        F: StorageFetcher<V> + ?Sized,
    {
        if !self.budget.try_consume(priority) {
            self.metrics.budget_denials.fetch_add(1, Ordering::Relaxed);
            return self.fallback(key, lookup);
        }
        // Cache under the strategy that granted the read, not the one this
        // read may tip usage into.
        let effective_ttl = self.effective_ttl(ttl);

        match fetch_with_timeout(fetcher, key).await {
            Ok(value) => {
                self.ledger.record_operation(OperationKind::Read, 1);
                self.metrics.fetches.fetch_add(1, Ordering::Relaxed);
                let now = self.clock.now();
                self.cache
                    .set(key, value.clone(), effective_ttl, now);
                CacheRead::fetched(value, now)
            }
            Err(err) => {
                self.metrics.fetch_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %err, "Fetch failed, serving fallback");
                self.fallback(key, lookup)
            }
        }
    }

    /// Serve what the cache holds, else the declared default.
    fn fallback(&self, key: &str, lookup: CacheLookup<V>) -> CacheRead<V> {
        match (lookup.state, lookup.value, lookup.inserted_at) {
            (CacheState::Fresh, Some(value), Some(cached_at)) => {
                self.metrics.fresh_hits.fetch_add(1, Ordering::Relaxed);
                CacheRead::fresh(value, cached_at)
            }
            (CacheState::Stale, Some(value), Some(cached_at)) => {
                self.metrics.stale_served.fetch_add(1, Ordering::Relaxed);
                CacheRead::stale(value, cached_at)
            }
            _ => {
                self.metrics.defaults_served.fetch_add(1, Ordering::Relaxed);
                CacheRead::default_value(self.default_for(key))
            }
        }
    }

    fn effective_ttl(&self, ttl: Duration) -> Duration {
        ttl.saturating_mul(self.budget.current_plan().ttl_multiplier)
    }
}

impl<V> std::fmt::Debug for ReadGateway<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGateway")
            .field("cache", &self.cache)
            .field("budget", &self.budget)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FnFetcher;
    use crate::strategy::StrategySelector;
    use chrono::{TimeZone, Utc};
    use frugal_core::{Clock, FetchError, FrugalConfig, ManualClock, ReadSource, TimeBand};
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        clock: ManualClock,
        ledger: Arc<QuotaLedger>,
        gateway: ReadGateway<Vec<String>>,
    }

    fn harness() -> Harness {
        let mut config = FrugalConfig::default();
        config.daily_limits.read = 100;
        config.time_bands = vec![TimeBand::new("flat", 0, 24, 10)];

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 4, 15, 0, 0).unwrap());
        let shared: SharedClock = Arc::new(clock.clone());
        let ledger = Arc::new(QuotaLedger::new(
            config.daily_limits.clone(),
            config.timezone(),
            shared.clone(),
        ));
        let selector = Arc::new(StrategySelector::from_config(&config));
        let budget = Arc::new(BudgetWindow::new(ledger.clone(), selector, shared.clone()));
        let cache = Arc::new(TieredCacheStore::from_config(&config));
        let gateway = ReadGateway::new(cache, budget, ledger.clone(), shared);
        Harness {
            clock,
            ledger,
            gateway,
        }
    }

    fn counting(calls: Arc<AtomicUsize>) -> impl StorageFetcher<Vec<String>> {
        FnFetcher::new(move |key: String| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(vec![key])
            }
        })
    }

    fn failing() -> impl StorageFetcher<Vec<String>> {
        FnFetcher::new(|key: String| async move {
            Err::<Vec<String>, _>(FetchError::failed(key, "backend down"))
        })
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_miss_fetches_and_records_read() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counting(calls.clone());

        let read = h.gateway.get("guild:1", &fetcher, TTL, Priority::Normal).await;
        assert_eq!(read.source(), ReadSource::Fetched);
        assert_eq!(read.value(), &vec!["guild:1".to_string()]);
        assert_eq!(h.ledger.count(OperationKind::Read), 1);

        let again = h.gateway.get("guild:1", &fetcher, TTL, Priority::Normal).await;
        assert_eq!(again.source(), ReadSource::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ledger.count(OperationKind::Read), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_serves_stale() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        h.gateway
            .get("k", &counting(calls), TTL, Priority::Normal)
            .await;
        h.clock.advance_secs(70);

        let read = h.gateway.get("k", &failing(), TTL, Priority::Normal).await;
        assert_eq!(read.source(), ReadSource::Stale);
        assert_eq!(read.value(), &vec!["k".to_string()]);
        assert_eq!(h.gateway.metrics().snapshot().fetch_errors, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_without_cache_serves_default() {
        let h = harness();
        h.gateway.declare_default("list:", vec!["empty".to_string()]);
        let read = h.gateway.get("list:7", &failing(), TTL, Priority::Normal).await;
        assert_eq!(read.source(), ReadSource::Default);
        assert_eq!(read.value(), &vec!["empty".to_string()]);
    }

    #[test]
    fn test_longest_prefix_default_wins() {
        let h = harness();
        h.gateway.declare_default("user:", vec!["u".to_string()]);
        h.gateway.declare_default("user:settings:", vec!["s".to_string()]);
        assert_eq!(h.gateway.default_for("user:settings:9"), vec!["s".to_string()]);
        assert_eq!(h.gateway.default_for("user:9"), vec!["u".to_string()]);
        assert!(h.gateway.default_for("guild:9").is_empty());
    }

    #[tokio::test]
    async fn test_budget_denied_miss_serves_default() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counting(calls.clone());
        for i in 0..10 {
            let key = format!("k{i}");
            let read = h.gateway.get(&key, &fetcher, TTL, Priority::Normal).await;
            assert_eq!(read.source(), ReadSource::Fetched);
        }
        let read = h.gateway.get("k10", &fetcher, TTL, Priority::Normal).await;
        assert_eq!(read.source(), ReadSource::Default);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(h.gateway.metrics().snapshot().budget_denials, 1);
    }

    #[tokio::test]
    async fn test_strategy_scales_ttl() {
        let h = harness();
        // 72% daily usage: conservative, TTL x2
        h.ledger.record_operation(OperationKind::Read, 72);
        let calls = Arc::new(AtomicUsize::new(0));
        h.gateway
            .get("k", &counting(calls), TTL, Priority::Normal)
            .await;

        h.clock.advance_secs(90);
        assert_eq!(
            h.gateway.cache().get("k", h.clock.now()).state,
            CacheState::Fresh
        );
    }

    #[tokio::test]
    async fn test_threshold_crossing_read_keeps_granting_ttl() {
        let h = harness();
        // 69% is still normal; this fetch takes usage to 70% (conservative).
        h.ledger.record_operation(OperationKind::Read, 69);
        let calls = Arc::new(AtomicUsize::new(0));
        h.gateway
            .get("k", &counting(calls), TTL, Priority::Normal)
            .await;
        assert_eq!(h.ledger.count(OperationKind::Read), 70);

        h.clock.advance_secs(90);
        assert_eq!(
            h.gateway.cache().get("k", h.clock.now()).state,
            CacheState::Stale
        );
    }

    #[tokio::test]
    async fn test_force_refresh_skips_fresh_hit() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counting(calls.clone());
        h.gateway.get("k", &fetcher, TTL, Priority::Normal).await;
        let read = h.gateway.force_refresh("k", &fetcher, TTL, Priority::High).await;
        assert_eq!(read.source(), ReadSource::Fetched);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_denied_keeps_fresh_value() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counting(calls.clone());
        h.gateway.get("k", &fetcher, TTL, Priority::Normal).await;
        h.ledger.record_operation(OperationKind::Read, 200);

        let read = h.gateway.force_refresh("k", &fetcher, TTL, Priority::High).await;
        assert_eq!(read.source(), ReadSource::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prime_and_invalidate() {
        let h = harness();
        h.gateway.prime("k", vec!["primed".to_string()], TTL);
        let read = h.gateway.get("k", &failing(), TTL, Priority::Normal).await;
        assert_eq!(read.source(), ReadSource::Fresh);
        assert_eq!(h.ledger.count(OperationKind::Read), 0);

        assert!(h.gateway.invalidate("k"));
        let read = h.gateway.get("k", &failing(), TTL, Priority::Normal).await;
        assert_eq!(read.source(), ReadSource::Default);
    }
}

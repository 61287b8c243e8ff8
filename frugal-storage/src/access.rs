//! Access layer composition root.
//!
//! Owns one instance of each component and wires them together. Build one
//! per process and hand `Arc<AccessLayer<V>>` to request handlers.

use crate::batcher::{BatchCommitter, WriteBatcher};
use crate::budget::BudgetWindow;
use crate::cache::TieredCacheStore;
use crate::fetch::StorageFetcher;
use crate::gateway::ReadGateway;
use crate::jobs::{maintenance_task, MaintenanceMetrics};
use crate::ledger::QuotaLedger;
use crate::strategy::StrategySelector;
use frugal_core::{
    BatchOperation, CacheRead, ConfigError, FrugalConfig, FrugalResult, OperationKind, Priority,
    SharedClock, Strategy,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Point-in-time summary of quota and queue state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessStatus {
    pub day_key: String,
    pub daily_usage_percent: BTreeMap<OperationKind, f64>,
    pub network_usage_percent: f64,
    pub strategy: Strategy,
    pub per_minute_limit: u32,
    pub minute_used: u32,
    pub cache_size: usize,
    pub queue_depth: usize,
}

pub struct AccessLayer<V> {
    config: FrugalConfig,
    clock: SharedClock,
    ledger: Arc<QuotaLedger>,
    budget: Arc<BudgetWindow>,
    gateway: ReadGateway<V>,
    batcher: WriteBatcher,
}

impl<V> AccessLayer<V>
where
    V: Clone + Default + Send + Sync + 'static,
{
    /// Validate `config` and build every component. Fails fast on an
    /// invalid configuration.
    pub fn new(
        config: FrugalConfig,
        clock: SharedClock,
        committer: Arc<dyn BatchCommitter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let ledger = Arc::new(QuotaLedger::new(
            config.daily_limits.clone(),
            config.timezone(),
            clock.clone(),
        ));
        let selector = Arc::new(StrategySelector::from_config(&config));
        let budget = Arc::new(BudgetWindow::new(
            ledger.clone(),
            selector,
            clock.clone(),
        ));
        let cache = Arc::new(TieredCacheStore::from_config(&config));
        let gateway = ReadGateway::new(cache, budget.clone(), ledger.clone(), clock.clone());
        let batcher = WriteBatcher::from_config(&config, committer, ledger.clone(), clock.clone());

        tracing::info!(
            daily_read_limit = config.daily_limits.read,
            cache_capacity = config.cache_capacity,
            flush_interval_ms = config.flush_interval_ms,
            max_batch_size = config.max_batch_size,
            "Access layer initialized"
        );

        Ok(Self {
            config,
            clock,
            ledger,
            budget,
            gateway,
            batcher,
        })
    }

    /// Load a TOML configuration from `path` and build the layer from it.
    pub fn from_path(
        path: &Path,
        clock: SharedClock,
        committer: Arc<dyn BatchCommitter>,
    ) -> FrugalResult<Self> {
        let config = FrugalConfig::from_path(path)?;
        Ok(Self::new(config, clock, committer)?)
    }

    /// Read `key` through the cache and budget. Never fails.
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
        self.gateway.get(key, fetcher, ttl, priority).await
    }

    /// Refetch `key` at high priority, ignoring a fresh cache entry.
    pub async fn force_refresh<F>(&self, key: &str, fetcher: &F, ttl: Duration) -> CacheRead<V>
    where
        F: StorageFetcher<V> + ?Sized,
    {
        self.gateway
            .force_refresh(key, fetcher, ttl, Priority::High)
            .await
    }

    /// Queue a write for the next flush.
    pub fn enqueue_write(&self, op: BatchOperation) {
        self.batcher.enqueue(op);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.gateway.invalidate(key)
    }

    pub fn prime(&self, key: &str, value: V, ttl: Duration) {
        self.gateway.prime(key, value, ttl);
    }

    pub fn declare_default(&self, prefix: impl Into<String>, value: V) {
        self.gateway.declare_default(prefix, value);
    }

    pub fn record_network_bytes(&self, bytes: u64) {
        self.ledger.record_network_bytes(bytes);
    }

    pub fn status(&self) -> AccessStatus {
        let ledger = self.ledger.snapshot();
        let window = self.budget.snapshot();
        AccessStatus {
            day_key: ledger.day_key,
            daily_usage_percent: ledger.usage_percent,
            network_usage_percent: ledger.network_usage_percent,
            strategy: window.strategy,
            per_minute_limit: window.limit,
            minute_used: window.used,
            cache_size: self.gateway.cache().len(),
            queue_depth: self.batcher.queue_depth(),
        }
    }

    /// Roll the day and the minute window if the clock moved on.
    pub fn roll_over(&self) -> (bool, bool) {
        (
            self.ledger.roll_over_if_needed(),
            self.budget.roll_over_if_needed(),
        )
    }

    /// Sweep expired cache entries as of now.
    pub fn sweep_cache(&self) -> usize {
        self.gateway.cache().sweep(self.clock.now())
    }

    /// Start the background flush/sweep/rollover task.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<Arc<MaintenanceMetrics>> {
        tokio::spawn(maintenance_task(self.clone(), shutdown_rx))
    }

    pub fn config(&self) -> &FrugalConfig {
        &self.config
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn budget(&self) -> &BudgetWindow {
        &self.budget
    }

    pub fn gateway(&self) -> &ReadGateway<V> {
        &self.gateway
    }

    pub fn batcher(&self) -> &WriteBatcher {
        &self.batcher
    }
}

impl<V> std::fmt::Debug for AccessLayer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLayer")
            .field("ledger", &self.ledger)
            .field("budget", &self.budget)
            .field("gateway", &self.gateway)
            .field("batcher", &self.batcher)
            .finish_non_exhaustive()
    }
}

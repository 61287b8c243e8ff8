//! Frugal Storage - Quota-Governed Data Access
//!
//! Sits between request handlers and a metered backing store. Reads go
//! through a tiered cache and a per-minute budget derived from daily usage;
//! writes are queued and committed in batches. Quota pressure degrades
//! freshness, never availability: callers always get a value.

pub mod access;
pub mod batcher;
pub mod budget;
pub mod cache;
pub mod fetch;
pub mod gateway;
pub mod jobs;
pub mod ledger;
pub mod strategy;

pub use access::{AccessLayer, AccessStatus};
pub use batcher::{
    BatchCommitter, BatcherMetrics, BatcherMetricsSnapshot, FlushOutcome, FnCommitter,
    RetryPolicy, WriteBatcher,
};
pub use budget::{BudgetMetrics, BudgetMetricsSnapshot, BudgetSnapshot, BudgetWindow};
pub use cache::{CacheLookup, CacheStats, TieredCacheStore};
pub use fetch::{fetch_with_timeout, FnFetcher, StorageFetcher};
pub use gateway::{GatewayMetrics, GatewayMetricsSnapshot, ReadGateway};
pub use jobs::{maintenance_task, MaintenanceMetrics, MaintenanceMetricsSnapshot};
pub use ledger::{LedgerSnapshot, QuotaLedger};
pub use strategy::{StrategyPlan, StrategySelector};

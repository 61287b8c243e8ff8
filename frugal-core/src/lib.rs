//! Frugal Core - Shared Types
//!
//! Pure data structures for the quota-governed access layer: operation
//! kinds, priorities, strategies, cache states, queued writes, the error
//! taxonomy, configuration and the clock abstraction. All other crates
//! depend on this one; it contains no quota or caching logic.

pub mod clock;
pub mod config;
pub mod enums;
pub mod error;
pub mod ops;
pub mod read;

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    DailyLimits, FrugalConfig, StrategyMultipliers, StrategyThresholds, TimeBand, TtlMultipliers,
    STORE_BATCH_LIMIT,
};
pub use enums::{CacheState, OperationKind, Priority, ReadSource, Strategy, WriteKind};
pub use error::{CommitError, ConfigError, FetchError, FrugalError, FrugalResult};
pub use ops::BatchOperation;
pub use read::CacheRead;

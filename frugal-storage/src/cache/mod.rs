//! Tiered in-memory cache.
//!
//! Entries move through three states as time passes: `Fresh` until their
//! TTL runs out, `Stale` until the grace deadline, then `Miss`. Stale
//! entries are kept on purpose; the read gateway serves them when the read
//! budget is spent or a fetch fails. A periodic sweep drops anything past
//! its grace deadline, and a capacity bound evicts the oldest insertion.
//!
//! The store knows nothing about strategies. Callers pass a TTL that
//! already carries the strategy's multiplier.

pub mod stats;
pub mod store;

pub use stats::CacheStats;
pub use store::{CacheLookup, TieredCacheStore};

//! Configuration types

use crate::error::ConfigError;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Largest batch the backing store accepts in a single commit.
pub const STORE_BATCH_LIMIT: usize = 500;

pub const DEFAULT_DAILY_READ_LIMIT: u64 = 50_000;
pub const DEFAULT_DAILY_WRITE_LIMIT: u64 = 20_000;
pub const DEFAULT_DAILY_DELETE_LIMIT: u64 = 20_000;
pub const DEFAULT_DAILY_NETWORK_BYTES: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_BASE_LIMIT: u32 = 20;
pub const DEFAULT_MIN_SCALED_LIMIT: u32 = 3;
pub const DEFAULT_STALE_GRACE_MULTIPLIER: u32 = 10;
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 250;
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 10;
pub const DEFAULT_BACKOFF_AFTER_FAILURES: u32 = 3;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

// ============================================================================
// SECTIONS
// ============================================================================

/// Daily caps imposed by the backing store's service tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyLimits {
    pub read: u64,
    pub write: u64,
    pub delete: u64,
    pub network_bytes: u64,
}

impl Default for DailyLimits {
    fn default() -> Self {
        Self {
            read: DEFAULT_DAILY_READ_LIMIT,
            write: DEFAULT_DAILY_WRITE_LIMIT,
            delete: DEFAULT_DAILY_DELETE_LIMIT,
            network_bytes: DEFAULT_DAILY_NETWORK_BYTES,
        }
    }
}

impl DailyLimits {
    pub fn for_kind(&self, kind: crate::OperationKind) -> u64 {
        match kind {
            crate::OperationKind::Read => self.read,
            crate::OperationKind::Write => self.write,
            crate::OperationKind::Delete => self.delete,
        }
    }
}

/// Hour-of-day range with its per-minute base allowance.
///
/// `start_hour` is inclusive and `end_hour` exclusive, in the configured
/// timezone. A band with `start_hour > end_hour` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBand {
    #[serde(default)]
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub base_limit: u32,
}

impl TimeBand {
    pub fn new(name: impl Into<String>, start_hour: u32, end_hour: u32, base_limit: u32) -> Self {
        Self {
            name: name.into(),
            start_hour,
            end_hour,
            base_limit,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Daily read usage percentages at which the strategy escalates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyThresholds {
    pub conservative: f64,
    pub aggressive: f64,
    pub emergency: f64,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            conservative: 70.0,
            aggressive: 90.0,
            emergency: 95.0,
        }
    }
}

/// Per-minute allowance multipliers applied to the time-band base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyMultipliers {
    pub conservative: f64,
    pub aggressive: f64,
}

impl Default for StrategyMultipliers {
    fn default() -> Self {
        Self {
            conservative: 0.7,
            aggressive: 0.4,
        }
    }
}

/// Cache TTL multipliers per strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlMultipliers {
    pub normal: u32,
    pub conservative: u32,
    pub aggressive: u32,
    pub emergency: u32,
}

impl Default for TtlMultipliers {
    fn default() -> Self {
        Self {
            normal: 1,
            conservative: 2,
            aggressive: 4,
            emergency: 8,
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration for the access layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrugalConfig {
    pub daily_limits: DailyLimits,
    pub time_bands: Vec<TimeBand>,
    /// Base allowance for hours no band covers.
    pub default_base_limit: u32,
    pub strategy_thresholds: StrategyThresholds,
    pub strategy_multipliers: StrategyMultipliers,
    /// Lowest allowance the Conservative and Aggressive multipliers may
    /// scale down to.
    pub min_scaled_limit: u32,
    pub ttl_multipliers: TtlMultipliers,
    /// Entries stay servable as stale until `ttl * stale_grace_multiplier`
    /// after insertion.
    pub stale_grace_multiplier: u32,
    pub cache_capacity: usize,
    pub sweep_interval_ms: u64,
    pub flush_interval_ms: u64,
    pub max_batch_size: usize,
    /// Consecutive failures after which the head batch is dropped. 0 keeps
    /// retrying forever.
    pub max_commit_attempts: u32,
    pub backoff_after_failures: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Offset of the timezone used for day keys and hour bands.
    pub utc_offset_minutes: i32,
}

impl Default for FrugalConfig {
    fn default() -> Self {
        Self {
            daily_limits: DailyLimits::default(),
            time_bands: vec![
                TimeBand::new("peak", 9, 23, 40),
                TimeBand::new("low", 2, 6, 10),
            ],
            default_base_limit: DEFAULT_BASE_LIMIT,
            strategy_thresholds: StrategyThresholds::default(),
            strategy_multipliers: StrategyMultipliers::default(),
            min_scaled_limit: DEFAULT_MIN_SCALED_LIMIT,
            ttl_multipliers: TtlMultipliers::default(),
            stale_grace_multiplier: DEFAULT_STALE_GRACE_MULTIPLIER,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_batch_size: STORE_BATCH_LIMIT,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            backoff_after_failures: DEFAULT_BACKOFF_AFTER_FAILURES,
            backoff_initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            utc_offset_minutes: 0,
        }
    }
}

impl FrugalConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: FrugalConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `FRUGAL_DAILY_READ_LIMIT`, `FRUGAL_DAILY_WRITE_LIMIT`,
    ///   `FRUGAL_DAILY_DELETE_LIMIT`, `FRUGAL_DAILY_NETWORK_BYTES`
    /// - `FRUGAL_DEFAULT_BASE_LIMIT`, `FRUGAL_MIN_SCALED_LIMIT`
    /// - `FRUGAL_CACHE_CAPACITY`, `FRUGAL_SWEEP_INTERVAL_MS`
    /// - `FRUGAL_FLUSH_INTERVAL_MS`, `FRUGAL_MAX_BATCH_SIZE`
    /// - `FRUGAL_MAX_COMMIT_ATTEMPTS`
    /// - `FRUGAL_UTC_OFFSET_MINUTES`
    ///
    /// An unset variable keeps the default; a set but unparseable one
    /// (including a negative limit) is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with variables read through
    /// `lookup`.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str, default: u64| parse_or(name, lookup(name), default);

        let config = Self {
            daily_limits: DailyLimits {
                read: var("FRUGAL_DAILY_READ_LIMIT", defaults.daily_limits.read)?,
                write: var("FRUGAL_DAILY_WRITE_LIMIT", defaults.daily_limits.write)?,
                delete: var("FRUGAL_DAILY_DELETE_LIMIT", defaults.daily_limits.delete)?,
                network_bytes: var(
                    "FRUGAL_DAILY_NETWORK_BYTES",
                    defaults.daily_limits.network_bytes,
                )?,
            },
            default_base_limit: parse_or(
                "FRUGAL_DEFAULT_BASE_LIMIT",
                lookup("FRUGAL_DEFAULT_BASE_LIMIT"),
                defaults.default_base_limit,
            )?,
            min_scaled_limit: parse_or(
                "FRUGAL_MIN_SCALED_LIMIT",
                lookup("FRUGAL_MIN_SCALED_LIMIT"),
                defaults.min_scaled_limit,
            )?,
            cache_capacity: parse_or(
                "FRUGAL_CACHE_CAPACITY",
                lookup("FRUGAL_CACHE_CAPACITY"),
                defaults.cache_capacity,
            )?,
            sweep_interval_ms: var("FRUGAL_SWEEP_INTERVAL_MS", defaults.sweep_interval_ms)?,
            flush_interval_ms: var("FRUGAL_FLUSH_INTERVAL_MS", defaults.flush_interval_ms)?,
            max_batch_size: parse_or(
                "FRUGAL_MAX_BATCH_SIZE",
                lookup("FRUGAL_MAX_BATCH_SIZE"),
                defaults.max_batch_size,
            )?,
            max_commit_attempts: parse_or(
                "FRUGAL_MAX_COMMIT_ATTEMPTS",
                lookup("FRUGAL_MAX_COMMIT_ATTEMPTS"),
                defaults.max_commit_attempts,
            )?,
            utc_offset_minutes: parse_or(
                "FRUGAL_UTC_OFFSET_MINUTES",
                lookup("FRUGAL_UTC_OFFSET_MINUTES"),
                defaults.utc_offset_minutes,
            )?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Small limits and short intervals for local development.
    pub fn development() -> Self {
        Self {
            daily_limits: DailyLimits {
                read: 1_000,
                write: 500,
                delete: 500,
                network_bytes: 100 * 1024 * 1024,
            },
            cache_capacity: 500,
            sweep_interval_ms: 5_000,
            flush_interval_ms: 100,
            max_batch_size: 50,
            ..Self::default()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Timezone for day keys and hour bands. Falls back to UTC when the
    /// offset is out of range (rejected by `validate`).
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    /// Validate the configuration.
    ///
    /// Everything checked here is a deployment mistake, so constructors
    /// call this and refuse to start on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.daily_limits;
        for (field, value) in [
            ("daily_limits.read", limits.read),
            ("daily_limits.write", limits.write),
            ("daily_limits.delete", limits.delete),
            ("daily_limits.network_bytes", limits.network_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, value, "must be greater than 0"));
            }
        }

        for (i, band) in self.time_bands.iter().enumerate() {
            if band.start_hour > 23 {
                return Err(ConfigError::invalid(
                    format!("time_bands[{i}].start_hour"),
                    band.start_hour,
                    "must be between 0 and 23",
                ));
            }
            if band.end_hour > 24 {
                return Err(ConfigError::invalid(
                    format!("time_bands[{i}].end_hour"),
                    band.end_hour,
                    "must be between 0 and 24",
                ));
            }
            if band.start_hour == band.end_hour {
                return Err(ConfigError::invalid(
                    format!("time_bands[{i}]"),
                    format!("{}-{}", band.start_hour, band.end_hour),
                    "start_hour and end_hour must differ",
                ));
            }
            if band.base_limit == 0 {
                return Err(ConfigError::invalid(
                    format!("time_bands[{i}].base_limit"),
                    band.base_limit,
                    "must be greater than 0",
                ));
            }
        }

        if self.default_base_limit == 0 {
            return Err(ConfigError::invalid(
                "default_base_limit",
                self.default_base_limit,
                "must be greater than 0",
            ));
        }

        let t = &self.strategy_thresholds;
        for (field, value) in [
            ("strategy_thresholds.conservative", t.conservative),
            ("strategy_thresholds.aggressive", t.aggressive),
            ("strategy_thresholds.emergency", t.emergency),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigError::invalid(field, value, "must be in (0, 100]"));
            }
        }
        if !(t.conservative < t.aggressive && t.aggressive < t.emergency) {
            return Err(ConfigError::invalid(
                "strategy_thresholds",
                format!("{}/{}/{}", t.conservative, t.aggressive, t.emergency),
                "thresholds must be strictly increasing",
            ));
        }

        let m = &self.strategy_multipliers;
        for (field, value) in [
            ("strategy_multipliers.conservative", m.conservative),
            ("strategy_multipliers.aggressive", m.aggressive),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::invalid(field, value, "must be in (0, 1]"));
            }
        }

        if self.min_scaled_limit == 0 {
            return Err(ConfigError::invalid(
                "min_scaled_limit",
                self.min_scaled_limit,
                "must be greater than 0",
            ));
        }

        let ttl = &self.ttl_multipliers;
        for (field, value) in [
            ("ttl_multipliers.normal", ttl.normal),
            ("ttl_multipliers.conservative", ttl.conservative),
            ("ttl_multipliers.aggressive", ttl.aggressive),
            ("ttl_multipliers.emergency", ttl.emergency),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, value, "must be at least 1"));
            }
        }

        if self.stale_grace_multiplier == 0 {
            return Err(ConfigError::invalid(
                "stale_grace_multiplier",
                self.stale_grace_multiplier,
                "must be at least 1",
            ));
        }

        for (field, value) in [
            ("cache_capacity", self.cache_capacity as u64),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("flush_interval_ms", self.flush_interval_ms),
            ("max_batch_size", self.max_batch_size as u64),
            ("backoff_initial_ms", self.backoff_initial_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, value, "must be greater than 0"));
            }
        }

        if self.max_batch_size > STORE_BATCH_LIMIT {
            return Err(ConfigError::invalid(
                "max_batch_size",
                self.max_batch_size,
                format!("must not exceed the store batch limit of {STORE_BATCH_LIMIT}"),
            ));
        }

        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ConfigError::invalid(
                "backoff_initial_ms",
                self.backoff_initial_ms,
                "must not exceed backoff_max_ms",
            ));
        }

        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::invalid(
                "utc_offset_minutes",
                self.utc_offset_minutes,
                "must be within +/- 14 hours",
            ));
        }

        Ok(())
    }
}

/// Parse an optional raw value, keeping `default` when it is absent.
fn parse_or<T: std::str::FromStr>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(name, &raw, "not a valid number")),
    }
}

// =============================================================================
// TESTS
// =============================================================================

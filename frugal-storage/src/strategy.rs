//! Strategy selection.
//!
//! Maps daily read usage to an operating [`Strategy`] and combines it with
//! the hour-of-day band to size the per-minute read allowance. The selector
//! holds configuration only; every answer is a pure function of its inputs.

use chrono::{FixedOffset, Timelike};
use frugal_core::{
    FrugalConfig, Strategy, StrategyMultipliers, StrategyThresholds, TimeBand, Timestamp,
    TtlMultipliers,
};

/// Strategy and per-minute allowance for one budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPlan {
    pub strategy: Strategy,
    pub per_minute_limit: u32,
    pub ttl_multiplier: u32,
}

#[derive(Debug, Clone)]
pub struct StrategySelector {
    thresholds: StrategyThresholds,
    multipliers: StrategyMultipliers,
    ttl_multipliers: TtlMultipliers,
    min_scaled_limit: u32,
    time_bands: Vec<TimeBand>,
    default_base_limit: u32,
    timezone: FixedOffset,
}

impl StrategySelector {
    /// Build from an already validated configuration.
    pub fn from_config(config: &FrugalConfig) -> Self {
        Self {
            thresholds: config.strategy_thresholds.clone(),
            multipliers: config.strategy_multipliers.clone(),
            ttl_multipliers: config.ttl_multipliers.clone(),
            min_scaled_limit: config.min_scaled_limit,
            time_bands: config.time_bands.clone(),
            default_base_limit: config.default_base_limit,
            timezone: config.timezone(),
        }
    }

    pub fn thresholds(&self) -> &StrategyThresholds {
        &self.thresholds
    }

    /// Strategy for a daily read usage percentage.
    pub fn strategy_for(&self, usage_percent: f64) -> Strategy {
        let t = &self.thresholds;
        if usage_percent >= t.emergency {
            Strategy::Emergency
        } else if usage_percent >= t.aggressive {
            Strategy::Aggressive
        } else if usage_percent >= t.conservative {
            Strategy::Conservative
        } else {
            // NaN lands here too.
            Strategy::Normal
        }
    }

    /// Base allowance for an hour of the day. The first matching band wins.
    pub fn base_limit_for(&self, hour: u32) -> u32 {
        self.time_bands
            .iter()
            .find(|band| band.contains(hour))
            .map(|band| band.base_limit)
            .unwrap_or(self.default_base_limit)
    }

    /// Hour of day of `now` in the selector's timezone.
    pub fn hour_of(&self, now: Timestamp) -> u32 {
        now.with_timezone(&self.timezone).hour()
    }

    /// Per-minute allowance for `strategy` at `hour`.
    ///
    /// Scaled allowances never drop below `min_scaled_limit` nor rise above
    /// the band's base. Emergency allows nothing; only critical reads get
    /// through.
    pub fn per_minute_limit(&self, strategy: Strategy, hour: u32) -> u32 {
        let base = self.base_limit_for(hour);
        let scaled = |multiplier: f64| -> u32 {
            ((base as f64 * multiplier).floor() as u32)
                .max(self.min_scaled_limit)
                .min(base)
        };
        match strategy {
            Strategy::Normal => base,
            Strategy::Conservative => scaled(self.multipliers.conservative),
            Strategy::Aggressive => scaled(self.multipliers.aggressive),
            Strategy::Emergency => 0,
        }
    }

    pub fn ttl_multiplier(&self, strategy: Strategy) -> u32 {
        match strategy {
            Strategy::Normal => self.ttl_multipliers.normal,
            Strategy::Conservative => self.ttl_multipliers.conservative,
            Strategy::Aggressive => self.ttl_multipliers.aggressive,
            Strategy::Emergency => self.ttl_multipliers.emergency,
        }
    }

    /// `(strategy, per-minute limit)` for a usage percentage at an hour.
    pub fn plan(&self, usage_percent: f64, hour: u32) -> StrategyPlan {
        let strategy = self.strategy_for(usage_percent);
        StrategyPlan {
            strategy,
            per_minute_limit: self.per_minute_limit(strategy, hour),
            ttl_multiplier: self.ttl_multiplier(strategy),
        }
    }

    pub fn plan_at(&self, usage_percent: f64, now: Timestamp) -> StrategyPlan {
        self.plan(usage_percent, self.hour_of(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use frugal_core::Strategy;
    use proptest::prelude::*;

    fn selector() -> StrategySelector {
        StrategySelector::from_config(&FrugalConfig::default())
    }

    #[test]
    fn test_threshold_table() {
        let s = selector();
        assert_eq!(s.strategy_for(0.0), Strategy::Normal);
        assert_eq!(s.strategy_for(69.99), Strategy::Normal);
        assert_eq!(s.strategy_for(70.0), Strategy::Conservative);
        assert_eq!(s.strategy_for(89.9), Strategy::Conservative);
        assert_eq!(s.strategy_for(90.0), Strategy::Aggressive);
        assert_eq!(s.strategy_for(94.9), Strategy::Aggressive);
        assert_eq!(s.strategy_for(95.0), Strategy::Emergency);
        assert_eq!(s.strategy_for(250.0), Strategy::Emergency);
    }

    #[test]
    fn test_time_band_bases() {
        let s = selector();
        assert_eq!(s.base_limit_for(12), 40); // peak
        assert_eq!(s.base_limit_for(3), 10); // low
        assert_eq!(s.base_limit_for(7), 20); // normal
        assert_eq!(s.base_limit_for(23), 20);
    }

    #[test]
    fn test_per_minute_multipliers() {
        let s = selector();
        assert_eq!(s.per_minute_limit(Strategy::Normal, 12), 40);
        assert_eq!(s.per_minute_limit(Strategy::Conservative, 12), 28);
        assert_eq!(s.per_minute_limit(Strategy::Aggressive, 12), 16);
        assert_eq!(s.per_minute_limit(Strategy::Emergency, 12), 0);
    }

    #[test]
    fn test_scaled_limit_respects_minimum() {
        let s = selector();
        // low band: 10 * 0.4 = 4, still above the minimum of 3
        assert_eq!(s.per_minute_limit(Strategy::Aggressive, 3), 4);

        let mut config = FrugalConfig::default();
        config.default_base_limit = 5;
        config.time_bands.clear();
        let s = StrategySelector::from_config(&config);
        // 5 * 0.4 = 2 would undercut the minimum of 3
        assert_eq!(s.per_minute_limit(Strategy::Aggressive, 3), 3);
    }

    #[test]
    fn test_ttl_multipliers() {
        let s = selector();
        let plan = s.plan(96.0, 12);
        assert_eq!(plan.strategy, Strategy::Emergency);
        assert_eq!(plan.per_minute_limit, 0);
        assert_eq!(plan.ttl_multiplier, 8);
        assert_eq!(s.ttl_multiplier(Strategy::Conservative), 2);
    }

    #[test]
    fn test_hour_uses_timezone() {
        let mut config = FrugalConfig::default();
        config.utc_offset_minutes = 5 * 60;
        let s = StrategySelector::from_config(&config);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 22, 0, 0).unwrap();
        assert_eq!(s.hour_of(now), 3);
        assert_eq!(s.plan_at(0.0, now).per_minute_limit, 10);
    }

    #[test]
    fn test_nan_is_normal() {
        assert_eq!(selector().strategy_for(f64::NAN), Strategy::Normal);
    }

    proptest! {
        /// Severity never decreases as usage grows.
        #[test]
        fn prop_strategy_monotonic(a in 0.0f64..200.0, b in 0.0f64..200.0) {
            let s = selector();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(s.strategy_for(lo) <= s.strategy_for(hi));
        }

        /// Same input, same answer.
        #[test]
        fn prop_plan_is_pure(p in 0.0f64..200.0, hour in 0u32..24) {
            let s = selector();
            prop_assert_eq!(s.plan(p, hour), s.plan(p, hour));
        }

        /// A more severe strategy never allows more reads per minute.
        #[test]
        fn prop_limit_non_increasing_with_severity(hour in 0u32..24) {
            let s = selector();
            let limits: Vec<u32> = Strategy::ALL
                .iter()
                .map(|st| s.per_minute_limit(*st, hour))
                .collect();
            for pair in limits.windows(2) {
                prop_assert!(pair[0] >= pair[1]);
            }
        }
    }
}

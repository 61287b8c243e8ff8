//! Per-minute read budget.
//!
//! The window's allowance is recomputed on every check from the current
//! strategy (daily read usage) and the hour-of-day band, and its `used`
//! counter resets whenever the wall-clock minute changes.

use crate::ledger::QuotaLedger;
use crate::strategy::{StrategyPlan, StrategySelector};
use frugal_core::{OperationKind, Priority, SharedClock, Strategy, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct WindowState {
    minute_key: i64,
    used: u32,
    limit: u32,
    strategy: Strategy,
}

/// Point-in-time view of the current minute window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    /// Minutes since the Unix epoch.
    pub minute_key: i64,
    pub used: u32,
    pub limit: u32,
    pub strategy: Strategy,
}

/// Counters for budget decisions.
#[derive(Debug, Default)]
pub struct BudgetMetrics {
    pub granted: AtomicU64,
    pub denied: AtomicU64,
    pub critical_bypasses: AtomicU64,
    pub high_overdrafts: AtomicU64,
}

/// Snapshot of budget metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BudgetMetricsSnapshot {
    pub granted: u64,
    pub denied: u64,
    pub critical_bypasses: u64,
    pub high_overdrafts: u64,
}

impl BudgetMetrics {
    pub fn snapshot(&self) -> BudgetMetricsSnapshot {
        BudgetMetricsSnapshot {
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            critical_bypasses: self.critical_bypasses.load(Ordering::Relaxed),
            high_overdrafts: self.high_overdrafts.load(Ordering::Relaxed),
        }
    }
}

/// Boolean gate for real reads.
pub struct BudgetWindow {
    ledger: Arc<QuotaLedger>,
    selector: Arc<StrategySelector>,
    clock: SharedClock,
    state: Mutex<WindowState>,
    metrics: BudgetMetrics,
}

impl BudgetWindow {
    pub fn new(
        ledger: Arc<QuotaLedger>,
        selector: Arc<StrategySelector>,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        let plan = selector.plan_at(ledger.usage_percentage(OperationKind::Read), now);
        Self {
            ledger,
            selector,
            clock,
            state: Mutex::new(WindowState {
                minute_key: minute_key(now),
                used: 0,
                limit: plan.per_minute_limit,
                strategy: plan.strategy,
            }),
            metrics: BudgetMetrics::default(),
        }
    }

    /// Ask for permission to perform one real read.
    ///
    /// - `Critical`: always true, `used` untouched.
    /// - `High`: true while daily read usage is below the emergency
    ///   threshold; consumes a slot only if one is left.
    /// - `Normal`: true only if `used < limit` for the current minute.
    pub fn try_consume(&self, priority: Priority) -> bool {
        if priority == Priority::Critical {
            self.metrics.critical_bypasses.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let now = self.clock.now();
        let usage = self.ledger.usage_percentage(OperationKind::Read);
        let plan = self.selector.plan_at(usage, now);

        let mut state = self.lock();
        refresh(&mut state, now, plan);

        let granted = match priority {
            Priority::High => {
                if usage >= self.selector.thresholds().emergency {
                    false
                } else {
                    if state.used < state.limit {
                        state.used += 1;
                    } else {
                        self.metrics.high_overdrafts.fetch_add(1, Ordering::Relaxed);
                    }
                    true
                }
            }
            _ => {
                if state.used < state.limit {
                    state.used += 1;
                    true
                } else {
                    false
                }
            }
        };

        if granted {
            self.metrics.granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.denied.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                priority = %priority,
                used = state.used,
                limit = state.limit,
                strategy = %state.strategy,
                "Read budget denied"
            );
        }
        granted
    }

    /// Current strategy plan, without consuming anything.
    pub fn current_plan(&self) -> StrategyPlan {
        let usage = self.ledger.usage_percentage(OperationKind::Read);
        self.selector.plan_at(usage, self.clock.now())
    }

    /// Roll the window forward if the minute changed. Called by the
    /// maintenance tick; checks also roll lazily.
    pub fn roll_over_if_needed(&self) -> bool {
        let now = self.clock.now();
        let plan = self.current_plan();
        let mut state = self.lock();
        refresh(&mut state, now, plan)
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let now = self.clock.now();
        let plan = self.current_plan();
        let mut state = self.lock();
        refresh(&mut state, now, plan);
        BudgetSnapshot {
            minute_key: state.minute_key,
            used: state.used,
            limit: state.limit,
            strategy: state.strategy,
        }
    }

    pub fn metrics(&self) -> &BudgetMetrics {
        &self.metrics
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BudgetWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetWindow")
            .field("state", &*self.lock())
            .field("metrics", &self.metrics)
            .finish()
    }
}

fn minute_key(now: Timestamp) -> i64 {
    now.timestamp().div_euclid(60)
}

/// Apply the latest plan and roll the minute. Returns true on a new minute.
fn refresh(state: &mut WindowState, now: Timestamp, plan: StrategyPlan) -> bool {
    if plan.strategy != state.strategy {
        tracing::info!(
            from = %state.strategy,
            to = %plan.strategy,
            per_minute_limit = plan.per_minute_limit,
            "Read strategy changed"
        );
        state.strategy = plan.strategy;
    }
    state.limit = plan.per_minute_limit;

    let key = minute_key(now);
    if key != state.minute_key {
        state.minute_key = key;
        state.used = 0;
        true
    } else {
        false
    }
}

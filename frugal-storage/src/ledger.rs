//! Daily usage ledger.
//!
//! Counts reads, writes and deletes (plus an optional byte counter) for the
//! current calendar day in the configured timezone. Counters reset lazily
//! whenever an access observes a new day, or from the maintenance tick.
//! The ledger never refuses an increment; keeping usage under the daily
//! limit is the budget window's job.

use chrono::{FixedOffset, NaiveDate};
use frugal_core::{DailyLimits, OperationKind, SharedClock, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct LedgerState {
    day: NaiveDate,
    counts: [u64; 3],
    network_bytes: u64,
    rollovers: u64,
}

impl LedgerState {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            counts: [0; 3],
            network_bytes: 0,
            rollovers: 0,
        }
    }
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    /// `YYYY-MM-DD` in the ledger's timezone.
    pub day_key: String,
    pub counts: BTreeMap<OperationKind, u64>,
    pub network_bytes: u64,
    pub usage_percent: BTreeMap<OperationKind, f64>,
    pub network_usage_percent: f64,
    /// Number of day rollovers observed since construction.
    pub rollovers: u64,
}

/// Per-day operation counters.
pub struct QuotaLedger {
    limits: DailyLimits,
    timezone: FixedOffset,
    clock: SharedClock,
    state: Mutex<LedgerState>,
}

impl QuotaLedger {
    pub fn new(limits: DailyLimits, timezone: FixedOffset, clock: SharedClock) -> Self {
        let day = day_of(clock.now(), timezone);
        Self {
            limits,
            timezone,
            clock,
            state: Mutex::new(LedgerState::new(day)),
        }
    }

    pub fn limits(&self) -> &DailyLimits {
        &self.limits
    }

    /// Increment today's counter for `kind`, rolling the day first.
    pub fn record_operation(&self, kind: OperationKind, count: u64) {
        let mut state = self.current();
        let slot = &mut state.counts[kind.index()];
        *slot = slot.saturating_add(count);
    }

    pub fn record_network_bytes(&self, bytes: u64) {
        let mut state = self.current();
        state.network_bytes = state.network_bytes.saturating_add(bytes);
    }

    pub fn count(&self, kind: OperationKind) -> u64 {
        self.current().counts[kind.index()]
    }

    pub fn network_bytes(&self) -> u64 {
        self.current().network_bytes
    }

    /// `count / daily_limit * 100`. Not capped: a critical-priority burst
    /// can push it past 100.
    pub fn usage_percentage(&self, kind: OperationKind) -> f64 {
        let count = self.count(kind);
        percent(count, self.limits.for_kind(kind))
    }

    pub fn network_usage_percentage(&self) -> f64 {
        percent(self.network_bytes(), self.limits.network_bytes)
    }

    /// Current day key, `YYYY-MM-DD`.
    pub fn day_key(&self) -> String {
        self.current().day.format("%Y-%m-%d").to_string()
    }

    /// Periodic tick entry point. Returns true when this call rolled the day.
    pub fn roll_over_if_needed(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        roll(&mut state, now, self.timezone)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.current();
        let mut counts = BTreeMap::new();
        let mut usage_percent = BTreeMap::new();
        for kind in OperationKind::ALL {
            let count = state.counts[kind.index()];
            counts.insert(kind, count);
            usage_percent.insert(kind, percent(count, self.limits.for_kind(kind)));
        }
        LedgerSnapshot {
            day_key: state.day.format("%Y-%m-%d").to_string(),
            counts,
            network_bytes: state.network_bytes,
            usage_percent,
            network_usage_percent: percent(state.network_bytes, self.limits.network_bytes),
            rollovers: state.rollovers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock and roll the day if the clock moved past it.
    fn current(&self) -> MutexGuard<'_, LedgerState> {
        let now = self.clock.now();
        let mut state = self.lock();
        roll(&mut state, now, self.timezone);
        state
    }
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("limits", &self.limits)
            .field("timezone", &self.timezone)
            .field("state", &*self.lock())
            .finish()
    }
}

fn day_of(now: Timestamp, timezone: FixedOffset) -> NaiveDate {
    now.with_timezone(&timezone).date_naive()
}

fn roll(state: &mut LedgerState, now: Timestamp, timezone: FixedOffset) -> bool {
    let today = day_of(now, timezone);
    // Only move forward; a clock stepping backwards must not reset mid-day.
    if today <= state.day {
        return false;
    }
    tracing::info!(
        previous_day = %state.day,
        new_day = %today,
        reads = state.counts[OperationKind::Read.index()],
        writes = state.counts[OperationKind::Write.index()],
        deletes = state.counts[OperationKind::Delete.index()],
        network_bytes = state.network_bytes,
        "Quota ledger rolled over"
    );
    state.day = today;
    state.counts = [0; 3];
    state.network_bytes = 0;
    state.rollovers += 1;
    true
}

fn percent(count: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    count as f64 / limit as f64 * 100.0
}

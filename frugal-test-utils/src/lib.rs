//! Frugal Test Utilities
//!
//! Shared test infrastructure for the frugal workspace:
//! - Recording and failing fetchers, a scripted batch committer
//! - Proptest generators for priorities, usage levels and write operations
//! - Fixtures for the standard quota scenario
//! - Custom assertions for read sources and commit order

pub use frugal_core::{
    BatchOperation, CacheRead, CacheState, Clock, CommitError, FetchError, FrugalConfig,
    ManualClock, OperationKind, Priority, ReadSource, SharedClock, Strategy, TimeBand, Timestamp,
    WriteKind,
};
pub use frugal_storage::{AccessLayer, AccessStatus, BatchCommitter, StorageFetcher};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// FETCHERS
// ============================================================================

/// Fetcher that always succeeds with a fixed value and records each call.
#[derive(Debug, Default)]
pub struct RecordingFetcher<V> {
    value: V,
    keys: Mutex<Vec<String>>,
}

impl<V: Clone> RecordingFetcher<V> {
    pub fn returning(value: V) -> Self {
        Self {
            value,
            keys: Mutex::new(Vec::new()),
        }
    }

    /// Number of fetches performed.
    pub fn calls(&self) -> usize {
        lock(&self.keys).len()
    }

    /// Keys fetched, in call order.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.keys).clone()
    }
}

#[async_trait]
impl<V> StorageFetcher<V> for RecordingFetcher<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn fetch(&self, key: &str) -> Result<V, FetchError> {
        lock(&self.keys).push(key.to_string());
        Ok(self.value.clone())
    }
}

/// Fetcher that always fails.
#[derive(Debug, Default)]
pub struct FailingFetcher {
    calls: AtomicUsize,
}

impl FailingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V: Send + 'static> StorageFetcher<V> for FailingFetcher {
    async fn fetch(&self, key: &str) -> Result<V, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::failed(key, "backing store unavailable"))
    }
}

// ============================================================================
// COMMITTER
// ============================================================================

/// Batch committer with a script of results.
///
/// Each commit consumes the next scripted result; once the script runs
/// out every commit succeeds. Every batch presented is recorded, failed
/// or not.
#[derive(Debug, Default)]
pub struct ScriptedCommitter {
    script: Mutex<VecDeque<Result<(), CommitError>>>,
    batches: Mutex<Vec<Vec<BatchOperation>>>,
    committed: Mutex<Vec<BatchOperation>>,
}

impl ScriptedCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` commits.
    pub fn failing(times: usize) -> Self {
        let committer = Self::new();
        committer.fail_next(times);
        committer
    }

    pub fn fail_next(&self, times: usize) {
        let mut script = lock(&self.script);
        for _ in 0..times {
            script.push_back(Err(CommitError::failed("scripted failure")));
        }
    }

    /// Every batch presented, including failed attempts.
    pub fn batches(&self) -> Vec<Vec<BatchOperation>> {
        lock(&self.batches).clone()
    }

    /// Target keys of each presented batch.
    pub fn batch_keys(&self) -> Vec<Vec<String>> {
        lock(&self.batches)
            .iter()
            .map(|batch| batch.iter().map(|op| op.target_key.clone()).collect())
            .collect()
    }

    /// Target keys of successfully committed operations, in commit order.
    pub fn committed_keys(&self) -> Vec<String> {
        lock(&self.committed)
            .iter()
            .map(|op| op.target_key.clone())
            .collect()
    }
}

#[async_trait]
impl BatchCommitter for ScriptedCommitter {
    async fn commit(&self, batch: &[BatchOperation]) -> Result<(), CommitError> {
        lock(&self.batches).push(batch.to_vec());
        let result = lock(&self.script).pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            lock(&self.committed).extend_from_slice(batch);
        }
        result
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for access-layer inputs.

    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use proptest::prelude::*;
    use proptest::strategy::Strategy;
    use serde_json::json;

    pub fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Normal),
            Just(Priority::High),
            Just(Priority::Critical),
        ]
    }

    /// Non-critical priorities, the ones the budget can deny.
    pub fn arb_gated_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![Just(Priority::Normal), Just(Priority::High)]
    }

    pub fn arb_operation_kind() -> impl Strategy<Value = OperationKind> {
        prop_oneof![
            Just(OperationKind::Read),
            Just(OperationKind::Write),
            Just(OperationKind::Delete),
        ]
    }

    /// Daily usage percentage, including overshoot past 100.
    pub fn arb_usage_percent() -> impl Strategy<Value = f64> {
        prop_oneof![
            0.0f64..70.0,
            70.0f64..90.0,
            90.0f64..95.0,
            95.0f64..150.0,
        ]
    }

    /// Cache key from a small alphabet so keys collide now and then.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "(user|guild|list):[0-9]{1,2}"
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..365 * 86_400).prop_map(|secs| {
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default()
                + ChronoDuration::seconds(secs)
        })
    }

    pub fn arb_write_kind() -> impl Strategy<Value = WriteKind> {
        prop_oneof![
            Just(WriteKind::Set),
            Just(WriteKind::Update),
            Just(WriteKind::Delete),
        ]
    }

    pub fn arb_batch_operation() -> impl Strategy<Value = BatchOperation> {
        (arb_write_kind(), arb_key(), any::<u32>(), arb_timestamp()).prop_map(
            |(kind, key, n, at)| match kind {
                WriteKind::Set => BatchOperation::set(key, json!({ "n": n }), at),
                WriteKind::Update => BatchOperation::update(key, json!({ "n": n }), at),
                WriteKind::Delete => BatchOperation::delete(key, at),
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for the standard quota scenario.

    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    /// Daily read limit 100 and a flat 10 reads/minute all day.
    pub fn scenario_config() -> FrugalConfig {
        let mut config = FrugalConfig {
            time_bands: vec![TimeBand::new("flat", 0, 24, 10)],
            ..FrugalConfig::development()
        };
        config.daily_limits.read = 100;
        config
    }

    /// 12:00:00 UTC on a weekday, well away from day and minute edges.
    pub fn start_time() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 4, 16, 12, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn manual_clock() -> ManualClock {
        ManualClock::new(start_time())
    }

    /// Access layer over `scenario_config`, driven by `clock`.
    pub fn scenario_layer<V>(
        clock: &ManualClock,
        committer: Arc<dyn BatchCommitter>,
    ) -> Arc<AccessLayer<V>>
    where
        V: Clone + Default + Send + Sync + 'static,
    {
        match AccessLayer::new(scenario_config(), Arc::new(clock.clone()), committer) {
            Ok(layer) => Arc::new(layer),
            Err(err) => panic!("scenario config must be valid: {err}"),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for read sources, usage levels and commit order.

    use super::*;
    use std::fmt::Debug;

    /// Assert which branch of the fallback chain produced `read`.
    #[track_caller]
    pub fn assert_source<V: Debug>(read: &CacheRead<V>, expected: ReadSource) {
        assert_eq!(
            read.source(),
            expected,
            "Expected a {:?} read, got: {:?}",
            expected,
            read
        );
    }

    /// Assert `read` is the declared default with the given value.
    #[track_caller]
    pub fn assert_default<V: Debug + PartialEq>(read: &CacheRead<V>, expected: &V) {
        assert_source(read, ReadSource::Default);
        assert_eq!(read.value(), expected, "Wrong default value");
    }

    /// Assert the daily usage for `kind` within a small tolerance.
    #[track_caller]
    pub fn assert_usage(status: &AccessStatus, kind: OperationKind, expected_percent: f64) {
        let actual = status
            .daily_usage_percent
            .get(&kind)
            .copied()
            .unwrap_or_default();
        assert!(
            (actual - expected_percent).abs() < 1e-9,
            "Expected {kind} usage {expected_percent}%, got {actual}%"
        );
    }

    /// Assert committed operations arrived in exactly `expected` order.
    #[track_caller]
    pub fn assert_committed_in_order(committer: &ScriptedCommitter, expected: &[&str]) {
        let expected: Vec<String> = expected.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            committer.committed_keys(),
            expected,
            "Committed operations out of order"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixtures::*;
    use generators::*;
    use proptest::prelude::*;

    #[test]
    fn test_scenario_config_is_valid() {
        let config = scenario_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.daily_limits.read, 100);
    }

    #[tokio::test]
    async fn test_scripted_committer_runs_script() {
        let committer = ScriptedCommitter::failing(1);
        let op = BatchOperation::delete("a", start_time());
        assert!(committer.commit(std::slice::from_ref(&op)).await.is_err());
        assert!(committer.commit(std::slice::from_ref(&op)).await.is_ok());
        assert_eq!(committer.batch_keys(), vec![vec!["a"], vec!["a"]]);
        assert_eq!(committer.committed_keys(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_recording_fetcher_records_keys() {
        let fetcher = RecordingFetcher::returning(5u8);
        assert_eq!(fetcher.fetch("x").await, Ok(5));
        assert_eq!(fetcher.keys(), vec!["x"]);
        let failing = FailingFetcher::new();
        assert!(StorageFetcher::<u8>::fetch(&failing, "y").await.is_err());
        assert_eq!(failing.calls(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_generated_operations_are_well_formed(op in arb_batch_operation()) {
            prop_assert!(!op.target_key.is_empty());
            prop_assert_eq!(op.payload.is_none(), op.kind == WriteKind::Delete);
        }

        #[test]
        fn prop_usage_percent_is_non_negative(p in arb_usage_percent()) {
            prop_assert!(p >= 0.0);
        }
    }
}

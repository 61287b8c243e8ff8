//! Write batcher.
//!
//! Writes are queued in memory and committed in batches by the maintenance
//! task. Enqueueing never blocks and never checks quota; committed batches
//! are recorded in the ledger after the fact.
//!
//! A failed batch goes back to the front of the queue in its original
//! order. After `backoff_after_failures` consecutive failures flushes are
//! skipped until an exponential, capped deadline passes. After
//! `max_commit_attempts` consecutive failures the head batch is dropped and
//! logged as data loss (0 disables dropping). A batch the store rejects
//! outright (`CommitError::Rejected`) is dropped on the spot. Until it
//! commits or is dropped, a failed batch is retried with exactly the same
//! operations.

use crate::ledger::QuotaLedger;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use frugal_core::{
    BatchOperation, CommitError, FrugalConfig, OperationKind, SharedClock, Timestamp,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Commits a batch to the backing store atomically.
#[async_trait]
pub trait BatchCommitter: Send + Sync {
    async fn commit(&self, batch: &[BatchOperation]) -> Result<(), CommitError>;
}

/// Adapts an async closure into a [`BatchCommitter`].
pub struct FnCommitter<F> {
    f: F,
}

impl<F> FnCommitter<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> BatchCommitter for FnCommitter<F>
where
    F: Fn(Vec<BatchOperation>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CommitError>> + Send,
{
    async fn commit(&self, batch: &[BatchOperation]) -> Result<(), CommitError> {
        (self.f)(batch.to_vec()).await
    }
}

/// What a single flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Queue was empty.
    Idle,
    Committed { count: usize },
    /// Commit failed; the batch is back at the head of the queue.
    Requeued {
        count: usize,
        consecutive_failures: u32,
    },
    /// Commit failed too many times; the batch is gone.
    Dropped { count: usize },
    /// Still inside a backoff period; nothing attempted.
    BackingOff,
}

/// Batcher metrics.
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    pub enqueued: AtomicU64,
    /// Operations committed.
    pub committed: AtomicU64,
    pub batches_committed: AtomicU64,
    pub commit_failures: AtomicU64,
    /// Operations dropped after exhausting commit attempts.
    pub dropped: AtomicU64,
    pub backoff_skips: AtomicU64,
}

/// Snapshot of batcher metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatcherMetricsSnapshot {
    pub enqueued: u64,
    pub committed: u64,
    pub batches_committed: u64,
    pub commit_failures: u64,
    pub dropped: u64,
    pub backoff_skips: u64,
}

impl BatcherMetrics {
    pub fn snapshot(&self) -> BatcherMetricsSnapshot {
        BatcherMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            backoff_skips: self.backoff_skips.load(Ordering::Relaxed),
        }
    }
}

/// Retry settings for failed commits.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_commit_attempts: u32,
    pub backoff_after_failures: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FrugalConfig) -> Self {
        Self {
            max_commit_attempts: config.max_commit_attempts,
            backoff_after_failures: config.backoff_after_failures,
            backoff_initial: config.backoff_initial(),
            backoff_max: config.backoff_max(),
        }
    }

    /// Backoff after `failures` consecutive failures, or `None` while still
    /// under the threshold.
    pub fn backoff_for(&self, failures: u32) -> Option<Duration> {
        let threshold = self.backoff_after_failures.max(1);
        if failures < threshold {
            return None;
        }
        let factor = 1u32
            .checked_shl(failures - threshold)
            .unwrap_or(u32::MAX);
        Some(
            self.backoff_initial
                .saturating_mul(factor)
                .min(self.backoff_max),
        )
    }

    fn exhausted(&self, failures: u32) -> bool {
        self.max_commit_attempts > 0 && failures >= self.max_commit_attempts
    }
}

#[derive(Debug, Default)]
struct RetryState {
    consecutive_failures: u32,
    next_attempt_at: Option<Timestamp>,
    /// Length of the failed batch at the head of the queue. Retries pop
    /// exactly this many so later writes never inherit its failures.
    pinned_len: Option<usize>,
}

pub struct WriteBatcher {
    queue: Mutex<VecDeque<BatchOperation>>,
    /// Serializes flushes and holds the retry bookkeeping.
    flush: tokio::sync::Mutex<RetryState>,
    committer: Arc<dyn BatchCommitter>,
    ledger: Arc<QuotaLedger>,
    clock: SharedClock,
    max_batch_size: usize,
    policy: RetryPolicy,
    metrics: BatcherMetrics,
}

impl WriteBatcher {
    pub fn new(
        committer: Arc<dyn BatchCommitter>,
        ledger: Arc<QuotaLedger>,
        clock: SharedClock,
        max_batch_size: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            flush: tokio::sync::Mutex::new(RetryState::default()),
            committer,
            ledger,
            clock,
            max_batch_size: max_batch_size.max(1),
            policy,
            metrics: BatcherMetrics::default(),
        }
    }

    pub fn from_config(
        config: &FrugalConfig,
        committer: Arc<dyn BatchCommitter>,
        ledger: Arc<QuotaLedger>,
        clock: SharedClock,
    ) -> Self {
        Self::new(
            committer,
            ledger,
            clock,
            config.max_batch_size,
            RetryPolicy::from_config(config),
        )
    }

    /// Append `op` to the queue. Returns immediately.
    pub fn enqueue(&self, op: BatchOperation) {
        self.lock_queue().push_back(op);
        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> usize {
        self.lock_queue().len()
    }

    /// Pop up to `max_batch_size` operations and commit them as one batch.
    pub async fn flush_once(&self) -> FlushOutcome {
        let mut retry = self.flush.lock().await;

        let now = self.clock.now();
        if let Some(deadline) = retry.next_attempt_at {
            if now < deadline {
                self.metrics.backoff_skips.fetch_add(1, Ordering::Relaxed);
                return FlushOutcome::BackingOff;
            }
        }

        let batch: Vec<BatchOperation> = {
            let mut queue = self.lock_queue();
            let take = queue
                .len()
                .min(retry.pinned_len.unwrap_or(self.max_batch_size));
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }
        let count = batch.len();

        match self.committer.commit(&batch).await {
            Ok(()) => {
                self.ledger
                    .record_operation(OperationKind::Write, count as u64);
                self.metrics
                    .committed
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.metrics.batches_committed.fetch_add(1, Ordering::Relaxed);
                if retry.consecutive_failures > 0 {
                    tracing::info!(
                        batch_len = count,
                        after_failures = retry.consecutive_failures,
                        "Batch commit recovered"
                    );
                }
                *retry = RetryState::default();
                FlushOutcome::Committed { count }
            }
            Err(err) => {
                retry.consecutive_failures += 1;
                self.metrics.commit_failures.fetch_add(1, Ordering::Relaxed);
                let failures = retry.consecutive_failures;

                let rejected = matches!(err, CommitError::Rejected { .. });
                if rejected || self.policy.exhausted(failures) {
                    tracing::error!(
                        batch_len = count,
                        consecutive_failures = failures,
                        rejected,
                        first_key = %batch[0].target_key,
                        error = %err,
                        "Dropping batch the store will not accept (data loss)"
                    );
                    self.metrics
                        .dropped
                        .fetch_add(count as u64, Ordering::Relaxed);
                    *retry = RetryState::default();
                    return FlushOutcome::Dropped { count };
                }

                {
                    let mut queue = self.lock_queue();
                    for op in batch.into_iter().rev() {
                        queue.push_front(op);
                    }
                }

                retry.pinned_len = Some(count);
                retry.next_attempt_at = self
                    .policy
                    .backoff_for(failures)
                    .and_then(|delay| ChronoDuration::from_std(delay).ok())
                    .and_then(|delay| now.checked_add_signed(delay));

                tracing::warn!(
                    batch_len = count,
                    consecutive_failures = failures,
                    backing_off = retry.next_attempt_at.is_some(),
                    error = %err,
                    "Batch commit failed, requeued"
                );
                FlushOutcome::Requeued {
                    count,
                    consecutive_failures: failures,
                }
            }
        }
    }

    /// Flush until the queue is empty or a flush does not commit. Returns
    /// the number of operations committed.
    pub async fn drain(&self) -> usize {
        let mut committed = 0;
        loop {
            match self.flush_once().await {
                FlushOutcome::Committed { count } => committed += count,
                FlushOutcome::Idle => break,
                outcome => {
                    tracing::warn!(
                        ?outcome,
                        remaining = self.queue_depth(),
                        "Drain stopped with writes still queued"
                    );
                    break;
                }
            }
        }
        committed
    }

    pub fn metrics(&self) -> &BatcherMetrics {
        &self.metrics
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<BatchOperation>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WriteBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatcher")
            .field("queue_depth", &self.queue_depth())
            .field("max_batch_size", &self.max_batch_size)
            .field("policy", &self.policy)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

//! Maintenance Background Task
//!
//! One task drives every timer the access layer needs:
//!
//! - flush tick (`flush_interval_ms`): commit one batch of queued writes
//! - sweep tick (`sweep_interval_ms`): drop cache entries past their grace
//! - rollover tick (every second): roll the ledger day and the minute window
//!
//! Reads also roll the day and minute lazily, so the rollover tick only
//! keeps idle periods accurate for `status()`. On shutdown the task drains
//! the write queue once before returning.

use crate::access::AccessLayer;
use crate::batcher::FlushOutcome;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const ROLLOVER_TICK: Duration = Duration::from_secs(1);

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for the maintenance task.
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    pub flush_ticks: AtomicU64,
    pub ops_committed: AtomicU64,
    pub sweep_ticks: AtomicU64,
    pub entries_swept: AtomicU64,
    pub day_rollovers: AtomicU64,
    pub minute_rollovers: AtomicU64,
    /// Operations committed by the shutdown drain.
    pub drained_on_shutdown: AtomicU64,
}

/// Snapshot of maintenance metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceMetricsSnapshot {
    pub flush_ticks: u64,
    pub ops_committed: u64,
    pub sweep_ticks: u64,
    pub entries_swept: u64,
    pub day_rollovers: u64,
    pub minute_rollovers: u64,
    pub drained_on_shutdown: u64,
}

impl MaintenanceMetrics {
    pub fn snapshot(&self) -> MaintenanceMetricsSnapshot {
        MaintenanceMetricsSnapshot {
            flush_ticks: self.flush_ticks.load(Ordering::Relaxed),
            ops_committed: self.ops_committed.load(Ordering::Relaxed),
            sweep_ticks: self.sweep_ticks.load(Ordering::Relaxed),
            entries_swept: self.entries_swept.load(Ordering::Relaxed),
            day_rollovers: self.day_rollovers.load(Ordering::Relaxed),
            minute_rollovers: self.minute_rollovers.load(Ordering::Relaxed),
            drained_on_shutdown: self.drained_on_shutdown.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run the access layer's timers until `shutdown_rx` turns true or its
/// sender is dropped.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = layer.spawn_maintenance(shutdown_rx);
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn maintenance_task<V>(
    layer: Arc<AccessLayer<V>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<MaintenanceMetrics>
where
    V: Clone + Default + Send + Sync + 'static,
{
    let metrics = Arc::new(MaintenanceMetrics::default());
    let config = layer.config();

    let mut flush_interval = interval(config.flush_interval());
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sweep_interval = interval(config.sweep_interval());
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut rollover_interval = interval(ROLLOVER_TICK);
    rollover_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        flush_interval_ms = config.flush_interval_ms,
        sweep_interval_ms = config.sweep_interval_ms,
        "Maintenance task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Maintenance task shutting down");
                    break;
                }
            }

            _ = flush_interval.tick() => {
                metrics.flush_ticks.fetch_add(1, Ordering::Relaxed);
                if let FlushOutcome::Committed { count } = layer.batcher().flush_once().await {
                    metrics.ops_committed.fetch_add(count as u64, Ordering::Relaxed);
                }
            }

            _ = sweep_interval.tick() => {
                metrics.sweep_ticks.fetch_add(1, Ordering::Relaxed);
                let swept = layer.sweep_cache();
                metrics.entries_swept.fetch_add(swept as u64, Ordering::Relaxed);
            }

            _ = rollover_interval.tick() => {
                let (day, minute) = layer.roll_over();
                if day {
                    metrics.day_rollovers.fetch_add(1, Ordering::Relaxed);
                }
                if minute {
                    metrics.minute_rollovers.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    let drained = layer.batcher().drain().await;
    metrics
        .drained_on_shutdown
        .store(drained as u64, Ordering::Relaxed);

    let snapshot = metrics.snapshot();
    tracing::info!(
        flush_ticks = snapshot.flush_ticks,
        ops_committed = snapshot.ops_committed,
        entries_swept = snapshot.entries_swept,
        drained_on_shutdown = snapshot.drained_on_shutdown,
        remaining = layer.batcher().queue_depth(),
        "Maintenance task completed"
    );

    metrics
}

//! Write batching against a scripted backing store.

use frugal_storage::FlushOutcome;
use frugal_test_utils::assertions::assert_committed_in_order;
use frugal_test_utils::fixtures::{manual_clock, scenario_config};
use frugal_test_utils::{
    AccessLayer, BatchOperation, Clock, FrugalConfig, ManualClock, OperationKind,
    ScriptedCommitter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn layer_with(
    clock: &ManualClock,
    committer: Arc<ScriptedCommitter>,
    tweak: impl FnOnce(&mut FrugalConfig),
) -> Arc<AccessLayer<u32>> {
    let mut config = scenario_config();
    config.max_batch_size = 2;
    config.backoff_after_failures = 10;
    config.max_commit_attempts = 0;
    tweak(&mut config);
    let layer = AccessLayer::new(config, Arc::new(clock.clone()), committer)
        .expect("batching config must be valid");
    Arc::new(layer)
}

fn enqueue_all(layer: &AccessLayer<u32>, clock: &ManualClock, keys: &[&str]) {
    for key in keys {
        layer.enqueue_write(BatchOperation::delete(*key, clock.now()));
    }
}

#[tokio::test]
async fn test_failed_batches_keep_fifo_order() {
    let clock = manual_clock();
    let committer = Arc::new(ScriptedCommitter::failing(2));
    let layer = layer_with(&clock, committer.clone(), |_| {});
    enqueue_all(&layer, &clock, &["a", "b", "c", "d", "e"]);

    let batcher = layer.batcher();
    assert_eq!(
        batcher.flush_once().await,
        FlushOutcome::Requeued {
            count: 2,
            consecutive_failures: 1
        }
    );
    assert_eq!(
        batcher.flush_once().await,
        FlushOutcome::Requeued {
            count: 2,
            consecutive_failures: 2
        }
    );
    assert_eq!(batcher.queue_depth(), 5);
    assert_eq!(batcher.drain().await, 5);

    assert_eq!(
        committer.batch_keys(),
        vec![
            vec!["a", "b"],
            vec!["a", "b"],
            vec!["a", "b"],
            vec!["c", "d"],
            vec!["e"],
        ]
    );
    assert_committed_in_order(&committer, &["a", "b", "c", "d", "e"]);
    assert_eq!(layer.ledger().count(OperationKind::Write), 5);
}

#[tokio::test]
async fn test_backoff_follows_the_domain_clock() {
    let clock = manual_clock();
    let committer = Arc::new(ScriptedCommitter::failing(3));
    let layer = layer_with(&clock, committer.clone(), |config| {
        config.backoff_after_failures = 1;
        config.backoff_initial_ms = 1_000;
        config.backoff_max_ms = 4_000;
    });
    enqueue_all(&layer, &clock, &["a"]);
    let batcher = layer.batcher();

    assert!(matches!(
        batcher.flush_once().await,
        FlushOutcome::Requeued { consecutive_failures: 1, .. }
    ));
    assert_eq!(batcher.flush_once().await, FlushOutcome::BackingOff);

    clock.advance_secs(1);
    assert!(matches!(
        batcher.flush_once().await,
        FlushOutcome::Requeued { consecutive_failures: 2, .. }
    ));

    // Second delay doubles to 2s.
    clock.advance_secs(1);
    assert_eq!(batcher.flush_once().await, FlushOutcome::BackingOff);
    clock.advance_secs(1);
    assert!(matches!(
        batcher.flush_once().await,
        FlushOutcome::Requeued { consecutive_failures: 3, .. }
    ));

    clock.advance_secs(4);
    assert_eq!(
        batcher.flush_once().await,
        FlushOutcome::Committed { count: 1 }
    );
    assert_eq!(committer.batches().len(), 4);
    assert_eq!(batcher.metrics().snapshot().backoff_skips, 2);
}

#[tokio::test]
async fn test_exhausted_batch_is_dropped() {
    let clock = manual_clock();
    let committer = Arc::new(ScriptedCommitter::failing(2));
    let layer = layer_with(&clock, committer.clone(), |config| {
        config.max_commit_attempts = 2;
    });
    enqueue_all(&layer, &clock, &["a", "b", "c"]);
    let batcher = layer.batcher();

    assert!(matches!(
        batcher.flush_once().await,
        FlushOutcome::Requeued { count: 2, .. }
    ));
    assert_eq!(batcher.flush_once().await, FlushOutcome::Dropped { count: 2 });
    assert_eq!(batcher.queue_depth(), 1);
    assert_eq!(batcher.flush_once().await, FlushOutcome::Committed { count: 1 });

    assert_committed_in_order(&committer, &["c"]);
    assert_eq!(batcher.metrics().snapshot().dropped, 2);
    assert_eq!(layer.ledger().count(OperationKind::Write), 1);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_task_retries_until_committed() {
    let clock = manual_clock();
    let committer = Arc::new(ScriptedCommitter::failing(1));
    let layer = layer_with(&clock, committer.clone(), |config| {
        config.flush_interval_ms = 100;
    });
    enqueue_all(&layer, &clock, &["a", "b", "c"]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = layer.spawn_maintenance(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(450)).await;

    assert_eq!(layer.status().queue_depth, 0);
    assert_committed_in_order(&committer, &["a", "b", "c"]);

    shutdown_tx.send(true).expect("maintenance task is running");
    let metrics = handle.await.expect("maintenance task panicked").snapshot();
    assert_eq!(metrics.ops_committed, 3);
    assert_eq!(metrics.drained_on_shutdown, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_remaining_writes() {
    let clock = manual_clock();
    let committer = Arc::new(ScriptedCommitter::new());
    let layer = layer_with(&clock, committer.clone(), |config| {
        config.flush_interval_ms = 60_000;
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = layer.spawn_maintenance(shutdown_rx);
    tokio::task::yield_now().await;

    enqueue_all(&layer, &clock, &["x", "y", "z"]);
    shutdown_tx.send(true).expect("maintenance task is running");
    let metrics = handle.await.expect("maintenance task panicked").snapshot();

    assert_eq!(metrics.ops_committed + metrics.drained_on_shutdown, 3);
    assert_eq!(layer.status().queue_depth, 0);
    assert_committed_in_order(&committer, &["x", "y", "z"]);
}

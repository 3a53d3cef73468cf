//! Tests for the polling worker

use chrono::Duration;
use tokio_util::sync::CancellationToken;

use super::helpers::*;
use crate::config::WorkerConfig;
use crate::worker::Worker;

#[tokio::test(flavor = "multi_thread")]
async fn test_poll_once_activates_due_executions() {
    let h = harness(review_definition());
    h.runner.start(input("exec-1")).await.unwrap();
    h.runner.start(input("exec-2")).await.unwrap();

    let worker = Worker::new(h.runner.clone(), &WorkerConfig::default());
    assert_eq!(worker.poll_once().await.unwrap(), 0);

    h.clock.advance(Duration::days(7));
    assert_eq!(worker.poll_once().await.unwrap(), 2);
    assert!(h.store.execution_ids().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_stops_on_cancellation() {
    let h = harness(review_definition());
    let worker = Worker::new(
        h.runner.clone(),
        &WorkerConfig {
            poll_interval_ms: 10,
            ..WorkerConfig::default()
        },
    );

    let shutdown = CancellationToken::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert!(result.is_ok());
}

//! Worker cycle scenarios against in-memory collaborators.

mod common;

use std::time::Duration;

use common::{eventually, Harness};
use viss_core::defaults::MAX_RETRIES;
use viss_core::{LogAction, VectorStatus};
use viss_inference::mock::MockEmbeddingProvider;
use viss_jobs::{run_once, JobOutcome};

#[tokio::test]
async fn test_happy_path_single_file() {
    let h = Harness::new();
    h.add_file("A", 7, Some("a red bicycle on grass"));
    h.add_row("A", VectorStatus::Pending);
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();

    let outcome = run_once(h.ctx()).await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Completed));

    let row = h.db.vector("A").unwrap();
    assert_eq!(row.status, VectorStatus::Completed);
    assert_eq!(row.retry_count, 0);
    assert!(row.error_message.is_empty());

    let point = h.store.get("A").expect("point stored");
    assert_eq!(point.payload.file_id, "A");
    assert_eq!(point.payload.user_id, 7);
    assert_eq!(point.payload.description, "a red bicycle on grass");
    assert_eq!(h.ctx().metrics.ack_total.get(), 1);
    assert!(h.queue.is_empty());

    let logs = h.db.logs();
    assert!(logs
        .iter()
        .any(|e| e.file_id == "A" && e.action == LogAction::Store));
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_succeed() {
    let h = Harness::new();
    h.add_file("A", 7, Some("a red bicycle on grass"));
    h.add_row("A", VectorStatus::Pending);
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    h.provider.fail_next(1);

    let first = run_once(h.ctx()).await.unwrap();
    assert_eq!(
        first,
        Some(JobOutcome::Retrying {
            retry_count: 1,
            delay: Duration::from_secs(1)
        })
    );
    let row = h.db.vector("A").unwrap();
    assert_eq!(row.status, VectorStatus::Pending);
    assert_eq!(row.retry_count, 1);
    assert!(!row.error_message.is_empty());
    assert!(row.last_retry_at.is_some());

    let metrics = h.ctx().queue.metrics().await.unwrap();
    assert_eq!(metrics.delayed, 1);

    tokio::time::advance(Duration::from_millis(1100)).await;
    let second = run_once(h.ctx()).await.unwrap();
    assert_eq!(second, Some(JobOutcome::Completed));

    let row = h.db.vector("A").unwrap();
    assert_eq!(row.status, VectorStatus::Completed);
    assert_eq!(row.retry_count, 0);
    assert_eq!(h.provider.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_retries() {
    let h = Harness::new();
    h.add_file("A", 7, Some("a red bicycle on grass"));
    h.add_row("A", VectorStatus::Pending);
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    h.provider.set_always_fail(true);

    let mut last = None;
    for _ in 0..MAX_RETRIES {
        last = run_once(h.ctx()).await.unwrap();
        assert!(last.is_some(), "job should be due");
        tokio::time::advance(Duration::from_secs(6)).await;
    }
    assert!(matches!(last, Some(JobOutcome::Failed { .. })));

    let row = h.db.vector("A").unwrap();
    assert_eq!(row.status, VectorStatus::Failed);
    assert_eq!(row.retry_count, MAX_RETRIES);
    assert!(!row.error_message.is_empty());
    assert!(h.ctx().metrics.nack_total.get() >= 3);

    // Terminal: nothing redelivered, and sweeps leave it alone.
    assert_eq!(run_once(h.ctx()).await.unwrap(), None);
    let swept = h.engine.enqueue_all_pending(100).await.unwrap();
    assert_eq!(swept.found, 0);
}

#[tokio::test]
async fn test_empty_description_skips_provider_and_store() {
    let h = Harness::new();
    h.add_file("A", 7, Some("   "));
    h.add_file("B", 7, None);
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    h.ctx().queue.enqueue_unique("B", Duration::ZERO).await.unwrap();

    assert_eq!(run_once(h.ctx()).await.unwrap(), Some(JobOutcome::Skipped));
    assert_eq!(run_once(h.ctx()).await.unwrap(), Some(JobOutcome::Skipped));

    assert_eq!(h.provider.call_count(), 0);
    assert!(h.store.is_empty());
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_deleted_file_is_acked_without_embedding() {
    let h = Harness::new();
    h.db.set_description("G", "a kite over the dunes");
    h.add_row("G", VectorStatus::Pending);
    h.ctx().queue.enqueue_unique("G", Duration::ZERO).await.unwrap();

    assert_eq!(run_once(h.ctx()).await.unwrap(), Some(JobOutcome::Skipped));

    assert_eq!(h.provider.call_count(), 0);
    assert!(h.store.get("G").is_none());
    assert!(h.queue.is_empty());
    assert_eq!(h.status("G"), Some(VectorStatus::Pending));
    assert!(h
        .db
        .logs()
        .iter()
        .any(|e| e.file_id == "G" && e.error_code == "data"));
}

#[tokio::test]
async fn test_unconfigured_provider_fails_without_retry() {
    let h = Harness::new();
    h.add_file("A", 7, Some("a red bicycle"));
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    h.provider.set_unavailable(true);

    let outcome = run_once(h.ctx()).await.unwrap();
    assert!(matches!(outcome, Some(JobOutcome::Failed { .. })));

    let row = h.db.vector("A").unwrap();
    assert_eq!(row.status, VectorStatus::Failed);
    assert_eq!(row.retry_count, 0);
    assert_eq!(h.provider.call_count(), 0);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_store_outage_is_retried() {
    let h = Harness::new();
    h.add_file("A", 7, Some("a red bicycle"));
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    h.store.set_unhealthy(true);

    let outcome = run_once(h.ctx()).await.unwrap();
    assert!(matches!(
        outcome,
        Some(JobOutcome::Retrying { retry_count: 1, .. })
    ));
    assert_eq!(h.status("A"), Some(VectorStatus::Pending));
}

#[tokio::test]
async fn test_paused_job_is_handed_back() {
    let h = Harness::new();
    h.add_file("A", 7, Some("a red bicycle"));
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    h.engine.pool().set_paused(true);

    assert_eq!(run_once(h.ctx()).await.unwrap(), Some(JobOutcome::Deferred));
    assert_eq!(h.provider.call_count(), 0);
    let metrics = h.ctx().queue.metrics().await.unwrap();
    assert_eq!(metrics.delayed + metrics.queued, 1);
}

#[tokio::test]
async fn test_unique_enqueue_is_observed_once() {
    let h = Harness::new();
    h.add_file("A", 7, Some("a red bicycle"));
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    h.ctx().queue.enqueue_unique("A", Duration::ZERO).await.unwrap();

    assert_eq!(run_once(h.ctx()).await.unwrap(), Some(JobOutcome::Completed));
    assert_eq!(run_once(h.ctx()).await.unwrap(), None);
    assert_eq!(h.provider.call_count(), 1);
}

#[tokio::test]
async fn test_duplicate_propagation_reuses_vector() {
    let h = Harness::with_provider(MockEmbeddingProvider::new().with_dimension(16));
    h.add_file("P", 3, Some("a lighthouse at dusk"));
    h.add_duplicate("D", 4, "P");
    h.add_row("D", VectorStatus::Pending);
    h.ctx().queue.enqueue_unique("P", Duration::ZERO).await.unwrap();

    assert_eq!(run_once(h.ctx()).await.unwrap(), Some(JobOutcome::Completed));

    let propagated = eventually(Duration::from_secs(2), || async {
        h.status("D") == Some(VectorStatus::Completed)
    })
    .await;
    assert!(propagated, "duplicate should complete");

    let parent = h.store.get("P").unwrap();
    let dup = h.store.get("D").unwrap();
    assert_eq!(dup.vector, parent.vector);
    assert_eq!(dup.payload.file_id, "D");
    assert_eq!(dup.payload.user_id, 4);
    assert_eq!(h.db.vector("D").unwrap().dimension, 16);
    assert_eq!(h.provider.call_count(), 1);
    assert!(h
        .db
        .logs()
        .iter()
        .any(|e| e.file_id == "D" && e.log_type == "duplicate"));
}

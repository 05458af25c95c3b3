//! Reconciliation, verification, and admin operations.

mod common;

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use common::{eventually, Harness};
use viss_core::defaults::{CONFIG_GROUP, VERIFY_STOPPED_REASON};
use viss_core::{
    keys, ActualStatus, Error, FileVector, JobQueue, LogAction, TaskStatus, TaskType,
    VectorPayload, VectorStatus, VectorStore, VerificationFilter,
};
use viss_jobs::{run_once, JobOutcome};

fn payload(id: &str) -> VectorPayload {
    VectorPayload {
        file_id: id.to_string(),
        description: "seed".to_string(),
        model: "mock-embedding".to_string(),
        user_id: 1,
    }
}

// =============================================================================
// RECONCILIATION
// =============================================================================

#[tokio::test]
async fn test_clean_orphans_removes_points_without_files() {
    let h = Harness::new();
    for id in ["A", "B", "C"] {
        h.store.upsert(id, &[1.0, 0.0], &payload(id)).await.unwrap();
    }
    h.add_file("A", 1, None);
    h.add_file("C", 1, None);

    let dry = h.engine.clean_orphans(100, true).await.unwrap();
    assert_eq!((dry.found, dry.removed), (1, 0));
    assert!(h.store.contains("B"));

    let result = h.engine.clean_orphans(100, false).await.unwrap();
    assert_eq!((result.found, result.removed), (1, 1));
    assert!(!h.store.contains("B"));
    assert!(h.store.contains("A"));
    assert!(h.store.contains("C"));
}

#[tokio::test]
async fn test_reconcile_missing_is_idempotent() {
    let h = Harness::new();
    h.add_file("A", 1, Some("first"));
    h.add_file("B", 1, Some("second"));
    h.add_file("C", 1, Some(""));
    h.add_row("B", VectorStatus::Stale);

    let dry = h.engine.reconcile_missing(100, true).await.unwrap();
    assert_eq!((dry.found, dry.enqueued), (2, 0));
    assert!(h.db.vector("A").is_none());

    let first = h.engine.reconcile_missing(100, false).await.unwrap();
    assert_eq!((first.found, first.enqueued), (2, 2));
    assert_eq!(h.status("A"), Some(VectorStatus::Pending));
    assert!(h.db.vector("C").is_none());

    let second = h.engine.reconcile_missing(100, false).await.unwrap();
    assert_eq!((second.found, second.enqueued), (0, 0));
    assert_eq!(h.queue.len(), 2);
}

#[tokio::test]
async fn test_reconcile_missing_looks_past_queued_backlog() {
    let h = Harness::new();
    for id in ["A1", "A2", "A3"] {
        h.add_file(id, 1, Some("already queued"));
        h.add_row(id, VectorStatus::Pending);
        h.ctx().queue.enqueue_unique(id, Duration::ZERO).await.unwrap();
    }
    h.add_file("B", 1, Some("newly described"));

    let result = h.engine.reconcile_missing(1, false).await.unwrap();
    assert_eq!((result.found, result.enqueued), (1, 1));
    assert_eq!(h.status("B"), Some(VectorStatus::Pending));
    assert_eq!(h.queue.len(), 4);
}

#[tokio::test]
async fn test_enqueue_all_pending_respects_pause_and_switch() {
    let h = Harness::new();
    h.add_row("A", VectorStatus::Pending);
    h.add_row("B", VectorStatus::Reset);
    h.add_row("C", VectorStatus::Completed);

    h.engine.pool().set_paused(true);
    assert_eq!(h.engine.enqueue_all_pending(100).await.unwrap().found, 0);
    h.engine.pool().set_paused(false);

    h.registry.set(CONFIG_GROUP, keys::VECTOR_ENABLED, json!(false));
    assert_eq!(h.engine.enqueue_all_pending(100).await.unwrap().found, 0);
    h.registry.set(CONFIG_GROUP, keys::VECTOR_ENABLED, json!(true));

    let result = h.engine.enqueue_all_pending(100).await.unwrap();
    assert_eq!((result.found, result.enqueued), (2, 2));
    let live = h
        .queue
        .live_jobs(&["A".to_string(), "B".to_string(), "C".to_string()])
        .await
        .unwrap();
    assert_eq!(live.len(), 2);
    assert!(!live.contains("C"));
}

#[tokio::test]
async fn test_rebuild_stale_enqueues_stale_rows() {
    let h = Harness::new();
    h.add_row("A", VectorStatus::Stale);
    h.add_row("B", VectorStatus::Completed);

    let result = h.engine.rebuild_stale(10).await.unwrap();
    assert_eq!((result.found, result.enqueued), (1, 1));
    assert_eq!(h.queue.len(), 1);
}

// =============================================================================
// VERIFICATION
// =============================================================================

#[tokio::test]
async fn test_verification_flags_missing_vector() {
    let h = Harness::new();
    h.add_file("X", 1, Some("a harbour"));
    h.add_file("Y", 1, Some("a meadow"));
    h.add_row("X", VectorStatus::Completed);
    h.add_row("Y", VectorStatus::Completed);
    h.store.upsert("Y", &[1.0, 0.0], &payload("Y")).await.unwrap();

    let task = h
        .engine
        .create_verification_task(VerificationFilter::NeedsVerification, None, Some(9), None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.task_type, TaskType::Manual);
    assert_eq!(task.total_count, 2);

    let done = h.engine.run_verification_task(&task.task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.processed_count, 2);
    assert!(done.missing_count >= 1);
    assert_eq!(done.verified_count, 1);
    assert!(done.completed_at.is_some());

    let x = h.db.vector("X").unwrap();
    assert_eq!(x.actual_status, ActualStatus::Missing);
    assert!(x.last_verified.is_some());
    assert!(x.verification_error.starts_with("Consistency error"));
    assert_eq!(h.db.vector("Y").unwrap().actual_status, ActualStatus::Verified);

    // Repair followed by one worker cycle restores the point.
    h.engine.repair_missing("X").await.unwrap();
    let row = h.db.vector("X").unwrap();
    assert_eq!(row.status, VectorStatus::Pending);
    assert_eq!(row.actual_status, ActualStatus::Unknown);
    assert_eq!(run_once(h.ctx()).await.unwrap(), Some(JobOutcome::Completed));
    assert_eq!(h.status("X"), Some(VectorStatus::Completed));
    assert!(h.store.contains("X"));
}

#[tokio::test]
async fn test_partial_task_requires_ids() {
    let h = Harness::new();
    let err = h
        .engine
        .create_verification_task(VerificationFilter::FileIds(vec![]), None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    h.add_row("A", VectorStatus::Completed);
    let task = h
        .engine
        .create_verification_task(
            VerificationFilter::FileIds(vec!["A".to_string()]),
            None,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(task.task_type, TaskType::Partial);
    assert_eq!(task.total_count, 1);
}

#[tokio::test]
async fn test_repair_requires_missing_label() {
    let h = Harness::new();
    h.add_row("A", VectorStatus::Completed);
    let err = h.engine.repair_missing("A").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = h.engine.repair_missing("nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_stop_running_task() {
    let h = Harness::new();
    for i in 0..6 {
        h.add_row(&format!("f{i}"), VectorStatus::Completed);
    }
    let task = h
        .engine
        .create_verification_task(VerificationFilter::ForceFullCheck, None, None, Some(1))
        .await
        .unwrap();
    h.engine.start_verification_task(&task.task_id).await.unwrap();

    let running = eventually(Duration::from_secs(2), || async {
        h.engine
            .get_verification_task(&task.task_id)
            .await
            .map(|t| t.status == TaskStatus::Running && t.processed_count >= 1)
            .unwrap_or(false)
    })
    .await;
    assert!(running, "task should be running");

    let conflict = h
        .engine
        .create_verification_task(VerificationFilter::ForceFullCheck, None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(conflict, Error::Conflict(_)));

    assert!(h.engine.stop_verification_task(&task.task_id).await.unwrap());
    let stopped = eventually(Duration::from_secs(2), || async {
        h.engine.verification().running_task_id().await.is_none()
            && h.engine
                .get_verification_task(&task.task_id)
                .await
                .map(|t| t.status.is_terminal())
                .unwrap_or(false)
    })
    .await;
    assert!(stopped, "task should stop");

    let task = h.engine.get_verification_task(&task.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message, VERIFY_STOPPED_REASON);
    assert!(task.processed_count < 6);
    assert!(!h.engine.stop_verification_task(&task.task_id).await.unwrap());
}

#[tokio::test]
async fn test_stop_pending_task_cancels() {
    let h = Harness::new();
    let task = h
        .engine
        .create_verification_task(VerificationFilter::ForceFullCheck, None, None, None)
        .await
        .unwrap();
    assert!(h.engine.stop_verification_task(&task.task_id).await.unwrap());
    let task = h.engine.get_verification_task(&task.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    let err = h.engine.run_verification_task(&task.task_id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_batch_repair_unknown_is_opt_in() {
    let h = Harness::new();
    let mut missing = FileVector::pending("M", "seed", "mock-embedding", 8);
    missing.status = VectorStatus::Completed;
    missing.actual_status = ActualStatus::Missing;
    h.db.insert_vector(missing);
    h.add_row("U", VectorStatus::Completed);

    assert_eq!(h.engine.batch_repair(false).await.unwrap(), 1);
    assert_eq!(h.status("M"), Some(VectorStatus::Pending));
    assert_eq!(h.status("U"), Some(VectorStatus::Completed));

    assert_eq!(h.engine.batch_repair(true).await.unwrap(), 1);
    assert_eq!(h.status("U"), Some(VectorStatus::Pending));
    assert_eq!(h.queue.len(), 2);
}

// =============================================================================
// ADMIN
// =============================================================================

#[tokio::test]
async fn test_retry_failed_resets_budget() {
    let h = Harness::new();
    let mut row = FileVector::pending("A", "seed", "mock-embedding", 8);
    row.status = VectorStatus::Failed;
    row.retry_count = 3;
    row.error_message = "timeout".to_string();
    h.db.insert_vector(row);
    h.add_row("B", VectorStatus::Completed);

    h.engine.retry_failed("A").await.unwrap();
    let row = h.db.vector("A").unwrap();
    assert_eq!(row.status, VectorStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert!(row.error_message.is_empty());
    assert_eq!(h.queue.len(), 1);

    let err = h.engine.retry_failed("B").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(h
        .db
        .logs()
        .iter()
        .any(|e| e.file_id == "A" && e.action == LogAction::Retry));
}

#[tokio::test]
async fn test_retry_all_failed() {
    let h = Harness::new();
    h.add_row("A", VectorStatus::Failed);
    h.add_row("B", VectorStatus::Failed);
    h.add_row("C", VectorStatus::Completed);

    assert_eq!(h.engine.retry_all_failed().await.unwrap(), 2);
    assert_eq!(h.status("A"), Some(VectorStatus::Pending));
    assert_eq!(h.status("C"), Some(VectorStatus::Completed));
    assert_eq!(h.queue.len(), 2);
}

#[tokio::test]
async fn test_regenerate_all_resets_and_enqueues() {
    let h = Harness::new();
    for id in ["A", "B", "C"] {
        h.add_row(id, VectorStatus::Completed);
    }

    assert_eq!(h.engine.regenerate_all().await.unwrap(), 3);
    for id in ["A", "B", "C"] {
        let row = h.db.vector(id).unwrap();
        assert_eq!(row.status, VectorStatus::Reset);
        assert_eq!(row.actual_status, ActualStatus::Unknown);
    }
    assert_eq!(h.queue.len(), 3);
}

#[tokio::test]
async fn test_recover_stuck_rows() {
    let h = Harness::new();
    let mut old = FileVector::pending("old", "seed", "mock-embedding", 8);
    old.status = VectorStatus::Processing;
    old.updated_at = Utc::now() - chrono::Duration::minutes(20);
    h.db.insert_vector(old);
    h.add_row("fresh", VectorStatus::Processing);

    assert_eq!(h.engine.recover_stuck(None).await.unwrap(), 1);
    assert_eq!(h.status("old"), Some(VectorStatus::Pending));
    assert_eq!(h.status("fresh"), Some(VectorStatus::Processing));

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.engine.recover_stuck(Some(Duration::ZERO)).await.unwrap(), 1);
    assert_eq!(h.status("fresh"), Some(VectorStatus::Pending));
    assert_eq!(h.queue.len(), 2);
    assert!(h
        .db
        .logs()
        .iter()
        .any(|e| e.action == LogAction::RecoverStuck));
}

#[tokio::test]
async fn test_remove_vector() {
    let h = Harness::new();
    h.add_row("A", VectorStatus::Completed);
    h.store.upsert("A", &[1.0, 0.0], &payload("A")).await.unwrap();

    assert!(h.engine.remove_vector("A").await.unwrap());
    assert!(!h.store.contains("A"));
    assert!(h.db.vector("A").is_none());
    assert!(!h.engine.remove_vector("A").await.unwrap());

    let logs = h.engine.processing_logs("A", 10).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|e| e.action == LogAction::Delete));
}

#[tokio::test]
async fn test_update_setting_persists_known_keys() {
    let h = Harness::new();
    let changed = h
        .engine
        .update_setting(keys::SEARCH_THRESHOLD, json!(0.5))
        .await
        .unwrap();
    assert!(changed);
    assert_eq!(h.registry.settings().search_threshold, 0.5);

    let unchanged = h
        .engine
        .update_setting(keys::SEARCH_THRESHOLD, json!(0.5))
        .await
        .unwrap();
    assert!(!unchanged);

    let err = h
        .engine
        .update_setting("vector_colour", json!("blue"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = h.engine.set_concurrency(1000).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_persisted_settings_apply_on_init() {
    let h = Harness::new();
    h.engine
        .update_setting(keys::CONCURRENCY, json!(7))
        .await
        .unwrap();
    h.registry.set(CONFIG_GROUP, keys::CONCURRENCY, json!(2));

    h.engine.init().await.unwrap();
    assert_eq!(h.registry.settings().concurrency, 7);
    assert_eq!(h.ctx().pool.concurrency(), 7);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = Harness::new();
    let report = h.engine.health().await;
    assert!(report.is_healthy());
    assert_eq!(report.queue_backend, "memory");

    h.store.set_unhealthy(true);
    let report = h.engine.health().await;
    assert!(!report.vector_store.ok);
    assert!(!report.is_healthy());

    let text = h.engine.metrics_text().await.unwrap();
    assert!(text.contains("vector_ack_total"));
    assert!(text.contains("vector_configured_concurrency"));

    let stats = h.engine.stats().await.unwrap();
    assert!(stats.enabled);
    assert!(!stats.paused);
}

//! Engine lifecycle with live workers, hot reload, and resize.

mod common;

use std::time::Duration;

use serde_json::json;

use common::{eventually, Harness};
use viss_core::defaults::CONFIG_GROUP;
use viss_core::{keys, VectorEvent, VectorStatus};
use viss_inference::mock::MockEmbeddingProvider;

const WAIT: Duration = Duration::from_secs(3);

/// Let the startup sweep run before seeding files it would otherwise pick up.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_startup_sweep_indexes_described_files() {
    let h = Harness::new();
    for id in ["a", "b", "c"] {
        h.add_file(id, 1, Some(&format!("picture {id}")));
    }
    h.engine.init().await.unwrap();
    h.engine.start();

    let done = eventually(WAIT, || async {
        ["a", "b", "c"]
            .iter()
            .all(|id| h.status(id) == Some(VectorStatus::Completed))
    })
    .await;
    assert!(done, "every described file should be indexed");
    assert_eq!(h.store.len(), 3);

    h.engine.shutdown().await;
    assert_eq!(h.engine.pool().live_workers(), 0);
}

#[tokio::test]
async fn test_live_resize() {
    let h = Harness::new();
    h.engine.init().await.unwrap();
    h.engine.start();
    assert_eq!(h.engine.pool().live_workers(), 3);

    h.engine.set_concurrency(5).await.unwrap();
    assert_eq!(h.engine.pool().live_workers(), 5);

    h.engine.set_concurrency(1).await.unwrap();
    let shrunk = eventually(WAIT, || async { h.engine.pool().live_workers() == 1 }).await;
    assert!(shrunk, "surplus workers should exit");

    h.engine.set_concurrency(2).await.unwrap();
    assert_eq!(h.engine.pool().live_workers(), 2);
    assert_eq!(h.registry.settings().concurrency, 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_pause_holds_jobs_until_resume() {
    let h = Harness::new();
    h.engine.init().await.unwrap();
    h.engine.start();
    settle().await;

    assert!(!h.engine.set_paused(true).await.unwrap());
    h.add_file("A", 1, Some("a kite"));
    h.ctx()
        .queue
        .enqueue_unique("A", Duration::ZERO)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.provider.call_count(), 0);

    assert!(!h.engine.toggle_pause().await.unwrap());
    let done = eventually(WAIT, || async {
        h.status("A") == Some(VectorStatus::Completed)
    })
    .await;
    assert!(done, "job should run after resume");

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_disable_lets_in_flight_job_finish() {
    let provider = MockEmbeddingProvider::new().with_latency(Duration::from_millis(300));
    let h = Harness::with_provider(provider);
    h.registry.set(CONFIG_GROUP, keys::CONCURRENCY, json!(1));
    h.engine.init().await.unwrap();
    h.engine.start();
    settle().await;
    h.add_file("A", 1, Some("a kite"));
    h.add_file("B", 1, Some("a boat"));

    h.ctx()
        .queue
        .enqueue_unique("A", Duration::ZERO)
        .await
        .unwrap();
    let embedding = eventually(WAIT, || async { h.provider.call_count() == 1 }).await;
    assert!(embedding, "worker should pick up A");

    h.registry.set(CONFIG_GROUP, keys::VECTOR_ENABLED, json!(false));
    let finished = eventually(WAIT, || async {
        h.status("A") == Some(VectorStatus::Completed)
    })
    .await;
    assert!(finished, "in-flight job should complete");

    h.ctx()
        .queue
        .enqueue_unique("B", Duration::ZERO)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.db.vector("B").is_none());
    assert_eq!(h.ctx().queue.metrics().await.unwrap().queued, 1);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_reload_changes_are_debounced() {
    let h = Harness::new();
    h.engine.init().await.unwrap();
    h.engine.start();

    h.registry.set(CONFIG_GROUP, keys::MODEL, json!("model-a"));
    h.registry.set(CONFIG_GROUP, keys::MODEL, json!("model-b"));
    h.registry.set(CONFIG_GROUP, keys::API_KEY, json!("sk-test"));

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(h.engine.watcher().sweeps_run(), 1);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_stats_are_published_to_subscribers() {
    let h = Harness::new();
    let mut events = h.engine.subscribe();
    h.add_file("A", 1, Some("a kite"));
    h.engine.init().await.unwrap();
    h.engine.start();

    let stats = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(VectorEvent::Stats(stats)) if stats.counts.total > 0 => return Some(stats),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten();
    assert!(stats.is_some(), "a stats event should arrive");

    h.engine.shutdown().await;
}

//! Redis queue tests.
//!
//! Require a Redis instance; skipped when `REDIS_URL` is unset. Each test
//! uses its own key prefix so runs never share state.

use std::time::Duration;

use viss_core::JobQueue;
use viss_jobs::RedisJobQueue;

async fn setup() -> Option<RedisJobQueue> {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").ok()?;
    let prefix = format!("viss-test-{}", uuid::Uuid::new_v4());
    Some(
        RedisJobQueue::connect_with_prefix(&url, &prefix)
            .await
            .expect("connect"),
    )
}

#[tokio::test]
async fn test_unique_enqueue_and_single_fetch() {
    let Some(queue) = setup().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };

    queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    assert_eq!(queue.metrics().await.unwrap().queued, 1);

    let lease = queue
        .fetch(Duration::from_secs(30))
        .await
        .unwrap()
        .expect("job due");
    assert_eq!(lease.file_id, "A");
    assert_eq!(lease.attempts, 0);
    assert!(queue.fetch(Duration::from_secs(30)).await.unwrap().is_none());

    // Still live while leased.
    queue.enqueue_unique("A", Duration::ZERO).await.unwrap();
    let metrics = queue.metrics().await.unwrap();
    assert_eq!(metrics.queued, 0);
    assert_eq!(metrics.in_flight, 1);

    queue.ack(&lease).await.unwrap();
    assert_eq!(queue.metrics().await.unwrap().in_flight, 0);
}

#[tokio::test]
async fn test_nack_delays_then_dead_letters() {
    let Some(queue) = setup().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };

    queue.enqueue_unique("B", Duration::ZERO).await.unwrap();
    let lease = queue.fetch(Duration::from_secs(30)).await.unwrap().unwrap();
    queue
        .nack(&lease, Duration::from_secs(60), false, "provider timeout")
        .await
        .unwrap();

    let metrics = queue.metrics().await.unwrap();
    assert_eq!(metrics.delayed, 1);
    assert_eq!(metrics.in_flight, 0);
    assert!(queue.fetch(Duration::from_secs(30)).await.unwrap().is_none());

    queue.enqueue_unique("C", Duration::ZERO).await.unwrap();
    let lease = queue.fetch(Duration::from_secs(30)).await.unwrap().unwrap();
    queue
        .nack(&lease, Duration::ZERO, true, "gave up")
        .await
        .unwrap();
    let metrics = queue.metrics().await.unwrap();
    assert_eq!(metrics.dlq, 1);
    assert_eq!(metrics.queued, 0);
}

#[tokio::test]
async fn test_stale_lease_is_ignored_after_reap() {
    let Some(queue) = setup().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };

    queue.enqueue_unique("D", Duration::ZERO).await.unwrap();
    let stale = queue.fetch(Duration::ZERO).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.reap_expired().await.unwrap(), 1);

    queue.ack(&stale).await.unwrap();
    let fresh = queue.fetch(Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(fresh.file_id, "D");
    assert_eq!(fresh.attempts, 1);
    queue.ack(&fresh).await.unwrap();
}

#[tokio::test]
async fn test_live_jobs_reports_queued_and_leased() {
    let Some(queue) = setup().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };

    queue.enqueue_unique("E", Duration::ZERO).await.unwrap();
    queue.enqueue_unique("F", Duration::ZERO).await.unwrap();
    let lease = queue.fetch(Duration::from_secs(30)).await.unwrap().unwrap();

    let ids = vec!["E".to_string(), "F".to_string(), "G".to_string()];
    let live = queue.live_jobs(&ids).await.unwrap();
    assert_eq!(live.len(), 2);
    assert!(!live.contains("G"));

    queue.ack(&lease).await.unwrap();
    let live = queue.live_jobs(&ids).await.unwrap();
    assert_eq!(live.len(), 1);
}

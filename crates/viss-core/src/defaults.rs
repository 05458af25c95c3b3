//! Centralized default constants for the vector indexing subsystem.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Runtime-tunable values are only defaults here; the live value is
//! read from the config registry.

use std::time::Duration;

// =============================================================================
// CONFIG REGISTRY
// =============================================================================

/// Config group holding every vector tunable.
pub const CONFIG_GROUP: &str = "vector";

/// Master switch default.
pub const VECTOR_ENABLED: bool = false;

/// Automatic processing default (workers fetch jobs).
pub const AUTO_PROCESSING_ENABLED: bool = true;

/// Default target worker count.
pub const CONCURRENCY: usize = 3;

/// Upper bound accepted for the worker count.
pub const MAX_CONCURRENCY: usize = 64;

/// Default OpenAI-compatible endpoint (normalized to end with `/v1`).
pub const EMBED_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Per-request timeout to the embedding provider in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout to the vector store in seconds.
pub const QDRANT_TIMEOUT_SECS: u64 = 30;

/// Minimum score retained by similar-by-id search.
pub const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Minimum score retained by textual search.
pub const SEARCH_THRESHOLD: f64 = 0.3;

/// Maximum hits per search.
pub const MAX_RESULTS: usize = 50;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Dimension for `text-embedding-3-small` and unknown models.
pub const EMBED_DIMENSION: usize = 1536;

/// Dimension for `text-embedding-3-large`.
pub const EMBED_DIMENSION_LARGE: usize = 3072;

// =============================================================================
// VECTOR STORE
// =============================================================================

/// Fixed collection name in the vector store.
pub const COLLECTION_NAME: &str = "file_vectors";

/// Page size used when scrolling point ids.
pub const SCROLL_PAGE_SIZE: usize = 256;

// =============================================================================
// QUEUE
// =============================================================================

/// Key prefix for the shared (Redis) queue backend.
pub const QUEUE_KEY_PREFIX: &str = "vector";

/// Lease held by a worker on a fetched job.
pub const LEASE_DURATION: Duration = Duration::from_secs(30);

/// How long `fetch` may wait for a job before returning empty.
pub const FETCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Interval between reaper sweeps of expired leases.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// WORKERS
// =============================================================================

/// Maximum attempts before a record transitions to `failed`.
pub const MAX_RETRIES: i32 = 3;

/// Sleep between polls when idle, paused, or over the target slot count.
pub const WORKER_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Redelivery delay when a job is fetched while paused.
pub const PAUSED_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Backoff per attempt number (1-based); attempts beyond the table reuse the last entry.
pub const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Default threshold for recovering rows stuck in `processing`.
pub const STUCK_THRESHOLD: Duration = Duration::from_secs(600);

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Debounce window coalescing config-change reconciliation.
pub const RECONCILE_DEBOUNCE: Duration = Duration::from_millis(300);

/// Default row limit for scheduled sweeps.
pub const RECONCILE_LIMIT: usize = 1000;

/// Default point limit for the orphan sweep.
pub const ORPHAN_SCAN_LIMIT: usize = 10_000;

// =============================================================================
// VERIFICATION
// =============================================================================

/// Default rows per verification batch.
pub const VERIFY_BATCH_SIZE: i32 = 100;

/// Pause between verification batches.
pub const VERIFY_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Rows verified longer ago than this are due again.
pub const VERIFY_STALE_AFTER_HOURS: i64 = 24;

/// Failure reason recorded when a running task is stopped.
pub const VERIFY_STOPPED_REASON: &str = "任务被手动停止";

// =============================================================================
// SEARCH
// =============================================================================

/// Oversampling factor for the user scope.
pub const OVERSAMPLE_USER: usize = 2;

/// Oversampling factor for the public gallery scope.
pub const OVERSAMPLE_GALLERY: usize = 3;

/// Oversampling factor for the admin scope.
pub const OVERSAMPLE_ADMIN: usize = 2;

/// Default page size for search responses.
pub const PAGE_SIZE: usize = 20;

// =============================================================================
// EVENTS
// =============================================================================

/// Capacity of the stats and config broadcast channels.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Backoff duration for a retry attempt (1-based).
pub fn retry_backoff(attempt: i32) -> Duration {
    let idx = (attempt.max(1) as usize - 1).min(RETRY_BACKOFF.len() - 1);
    RETRY_BACKOFF[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_table() {
        assert_eq!(retry_backoff(1), Duration::from_secs(1));
        assert_eq!(retry_backoff(2), Duration::from_secs(3));
        assert_eq!(retry_backoff(3), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_backoff_clamps() {
        assert_eq!(retry_backoff(0), Duration::from_secs(1));
        assert_eq!(retry_backoff(9), Duration::from_secs(5));
    }

    #[test]
    fn test_lease_exceeds_reaper_interval() {
        assert!(LEASE_DURATION > REAPER_INTERVAL);
    }
}

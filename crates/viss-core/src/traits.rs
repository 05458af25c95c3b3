//! Core traits for the vector indexing subsystem.
//!
//! These traits define the seams between the engine and its collaborators:
//! the relational metadata store, the embedding provider, the vector store,
//! and the job queue. Each has a production implementation and an in-memory
//! one honoring the same contract for tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// METADATA STORE
// =============================================================================

/// Read access to the external `file` and `file_ai_info` tables.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Fetch a file row.
    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>>;

    /// Fetch the AI description for a file.
    async fn get_ai_info(&self, file_id: &str) -> Result<Option<FileAiInfo>>;

    /// Files whose `original_file_id` is `original_id`, excluding pending deletion.
    async fn list_duplicates(&self, original_id: &str) -> Result<Vec<FileRecord>>;

    /// Subset of `ids` that exist in the `file` table.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Files among `ids` visible in `scope`. Order is unspecified.
    async fn hydrate(&self, ids: &[String], scope: &SearchScope) -> Result<Vec<FileRecord>>;
}

/// Owned `file_vector` rows. Every mutation is an explicit column write.
#[async_trait]
pub trait FileVectorRepository: Send + Sync {
    /// Fetch a row.
    async fn get(&self, file_id: &str) -> Result<Option<FileVector>>;

    /// Insert a `pending` row if none exists. Returns true when a row was created.
    async fn ensure_pending(
        &self,
        file_id: &str,
        description: &str,
        model: &str,
        dimension: i32,
    ) -> Result<bool>;

    /// `status := processing, error_message := ""`.
    async fn mark_processing(&self, file_id: &str) -> Result<()>;

    /// `status := completed, retry_count := 0, error_message := ""`, creating the row if needed.
    async fn mark_completed(
        &self,
        file_id: &str,
        description: &str,
        model: &str,
        dimension: i32,
    ) -> Result<()>;

    /// Increment `retry_count` (bounded by `max`), set `last_retry_at`, return the new count.
    async fn increment_retry(&self, file_id: &str, max: i32) -> Result<i32>;

    /// `status := pending` with the last error retained for display.
    async fn mark_pending(&self, file_id: &str, error_message: &str) -> Result<()>;

    /// `status := failed` with a reason.
    async fn mark_failed(&self, file_id: &str, error_message: &str) -> Result<()>;

    /// Oldest rows that may be enqueued: `pending`, `reset`, and `failed` rows
    /// still under `max_retries`.
    async fn list_enqueueable(&self, limit: i64, max_retries: i32) -> Result<Vec<String>>;

    /// Oldest rows in `status`.
    async fn list_ids_by_status(&self, status: VectorStatus, limit: i64) -> Result<Vec<String>>;

    /// Described, live files lacking a row or with a row in `pending|reset|stale`
    /// (or `failed` still under `max_retries`), ordered by file id and
    /// starting strictly after `after` when given.
    async fn reconcile_candidates(
        &self,
        after: Option<&str>,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<ReconcileCandidate>>;

    /// Rows matching a verification filter.
    async fn count_for_verification(&self, filter: &VerificationFilter) -> Result<i64>;

    /// Next page of rows matching `filter`, ordered by `(created_at, file_id)`.
    async fn list_for_verification(
        &self,
        filter: &VerificationFilter,
        after: Option<&VerifyCursor>,
        limit: i64,
    ) -> Result<Vec<FileVector>>;

    /// Record a verification observation and set `last_verified := now`.
    async fn record_verification(
        &self,
        file_id: &str,
        actual: ActualStatus,
        error: &str,
    ) -> Result<()>;

    /// `status := pending, actual_status := unknown, verification_error := ""`.
    async fn reset_for_repair(&self, file_id: &str) -> Result<bool>;

    /// Completed rows labelled missing (and unknown when `include_unknown`).
    async fn list_problem_ids(&self, include_unknown: bool, limit: i64) -> Result<Vec<String>>;

    /// `status := pending, retry_count := 0, error_message := ""`.
    async fn reset_retry(&self, file_id: &str) -> Result<bool>;

    /// Every row to `reset` with counters cleared. Returns rows touched.
    async fn reset_all(&self) -> Result<u64>;

    /// Rows in `processing` last updated before `before` go back to `pending`.
    async fn recover_stuck(&self, before: DateTime<Utc>) -> Result<Vec<String>>;

    /// Delete a row. Returns true if it existed.
    async fn delete(&self, file_id: &str) -> Result<bool>;

    /// Counts per status and label.
    async fn status_counts(&self) -> Result<StatusCounts>;
}

/// Persistence for `vector_verification_task`.
#[async_trait]
pub trait VerificationTaskRepository: Send + Sync {
    async fn create(&self, task: &VerificationTask) -> Result<()>;

    async fn get(&self, task_id: &str) -> Result<Option<VerificationTask>>;

    /// Most recent first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<VerificationTask>>;

    async fn find_running(&self) -> Result<Option<VerificationTask>>;

    /// `status := running, started_at := now`.
    async fn mark_running(&self, task_id: &str) -> Result<()>;

    async fn update_progress(&self, task_id: &str, progress: &TaskProgress) -> Result<()>;

    /// Terminal transition; sets `completed_at := now`.
    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        error_message: &str,
        progress: &TaskProgress,
    ) -> Result<()>;
}

/// Append-only `vector_processing_log`.
#[async_trait]
pub trait ProcessingLogRepository: Send + Sync {
    async fn append(&self, entry: &ProcessingLogEntry) -> Result<()>;

    /// Most recent first.
    async fn list_for_file(&self, file_id: &str, limit: i64) -> Result<Vec<ProcessingLogEntry>>;
}

/// Durable storage for config registry values.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_group(&self, group: &str) -> Result<Vec<(String, JsonValue)>>;

    async fn save(&self, group: &str, key: &str, value: &JsonValue) -> Result<()>;
}

/// The metadata repositories bundled for the engine.
#[derive(Clone)]
pub struct MetadataStores {
    pub files: Arc<dyn FileRepository>,
    pub vectors: Arc<dyn FileVectorRepository>,
    pub tasks: Arc<dyn VerificationTaskRepository>,
    pub logs: Arc<dyn ProcessingLogRepository>,
    pub config: Arc<dyn ConfigStore>,
}

// =============================================================================
// EMBEDDING PROVIDER
// =============================================================================

/// Text to fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; one vector per non-empty preprocessed input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension produced by the current model.
    fn dimension(&self) -> usize;

    /// Current model id.
    fn model(&self) -> String;

    /// Fails with a config error when the provider cannot be called.
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// VECTOR STORE
// =============================================================================

/// Points keyed by file id in an external vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it is absent.
    async fn init_collection(&self, dimension: usize) -> Result<()>;

    async fn upsert(&self, file_id: &str, vector: &[f32], payload: &VectorPayload) -> Result<()>;

    async fn fetch(&self, file_id: &str) -> Result<Option<StoredPoint>>;

    async fn exists(&self, file_id: &str) -> Result<bool>;

    async fn delete(&self, file_id: &str) -> Result<()>;

    /// Hits with `score >= threshold` in descending score order, at most `limit`.
    /// `user_id == 0` disables the payload filter.
    async fn similarity_search(
        &self,
        vector: &[f32],
        limit: usize,
        user_id: i64,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>>;

    /// Search with the stored vector of `file_id`; empty when it has none.
    async fn search_by_id(
        &self,
        file_id: &str,
        limit: usize,
        user_id: i64,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>> {
        match self.fetch(file_id).await? {
            Some(point) => {
                self.similarity_search(&point.vector, limit, user_id, threshold)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn count(&self) -> Result<u64>;

    /// One page of file ids and the cursor for the next page (None at the end).
    async fn scroll_ids(
        &self,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)>;

    /// Up to `limit` file ids, following scroll cursors until exhausted.
    async fn scroll_all_ids(&self, limit: usize) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut offset = None;
        while ids.len() < limit {
            let page = (limit - ids.len()).min(crate::defaults::SCROLL_PAGE_SIZE);
            let (batch, next) = self.scroll_ids(page, offset).await?;
            let empty = batch.is_empty();
            ids.extend(batch);
            match next {
                Some(n) if !empty => offset = Some(n),
                _ => break,
            }
        }
        ids.truncate(limit);
        Ok(ids)
    }

    async fn health(&self) -> Result<()>;

    /// Fails with a config error when no store is configured.
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Durable FIFO of file ids with unique enqueue, leases, delayed redelivery,
/// and a dead-letter set.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Backend name for logs and health.
    fn name(&self) -> &'static str;

    /// Insert a job unless one for `file_id` is queued or processing.
    async fn enqueue_unique(&self, file_id: &str, delay: Duration) -> Result<()>;

    /// Claim the oldest due job, leasing it for `lease`.
    async fn fetch(&self, lease: Duration) -> Result<Option<Lease>>;

    /// Remove the job. A stale lease is ignored.
    async fn ack(&self, lease: &Lease) -> Result<()>;

    /// Reschedule at `now + delay` (attempts + 1) or move to the dead-letter set.
    async fn nack(&self, lease: &Lease, delay: Duration, to_dlq: bool, reason: &str)
        -> Result<()>;

    /// Point-in-time counters.
    async fn metrics(&self) -> Result<QueueMetrics>;

    /// Return expired leases to the queue. Returns jobs requeued.
    async fn reap_expired(&self) -> Result<u64>;

    /// Subset of `file_ids` with a queued or processing job.
    async fn live_jobs(&self, file_ids: &[String]) -> Result<HashSet<String>>;

    /// Drop terminal job records for `file_ids`. Backends without terminal records do nothing.
    async fn purge_terminal(&self, _file_ids: &[String]) -> Result<u64> {
        Ok(0)
    }
}

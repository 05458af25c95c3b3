//! Sweeps closing the gap between relational state and the vector store.
//!
//! | Sweep | Selects | Action |
//! |-------|---------|--------|
//! | [`Reconciler::enqueue_all_pending`] | `pending`, `reset`, retryable `failed` rows | enqueue |
//! | [`Reconciler::reconcile_missing`] | described files without a usable row | create row, enqueue |
//! | [`Reconciler::clean_orphans`] | points whose file is gone | delete point |
//! | [`Reconciler::rebuild_stale`] | `stale` rows | enqueue |
//!
//! Errors end the sweep; the next scheduled tick retries.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use viss_core::defaults::MAX_RETRIES;
use viss_core::{Result, VectorStatus};

use crate::context::EngineContext;

/// Ids checked against the file table per query.
const EXISTENCE_CHUNK: usize = 500;

/// Result of an enqueueing sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub found: usize,
    pub enqueued: usize,
}

/// Result of the orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanResult {
    pub found: usize,
    pub removed: usize,
}

/// Runs reconciliation sweeps against one engine context.
#[derive(Clone)]
pub struct Reconciler {
    ctx: EngineContext,
}

impl Reconciler {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    async fn enqueue_each(&self, ids: &[String]) -> Result<usize> {
        for id in ids {
            self.ctx.queue.enqueue_unique(id, Duration::ZERO).await?;
        }
        Ok(ids.len())
    }

    /// Enqueue the oldest enqueueable rows. Skipped while paused or disabled.
    pub async fn enqueue_all_pending(&self, limit: usize) -> Result<ReconcileResult> {
        if self.ctx.pool.is_paused() || !self.ctx.registry.settings().enabled {
            debug!(
                subsystem = "reconcile",
                op = "enqueue_all_pending",
                paused = self.ctx.pool.is_paused(),
                "Sweep skipped"
            );
            return Ok(ReconcileResult::default());
        }

        let start = Instant::now();
        let ids = self
            .ctx
            .stores
            .vectors
            .list_enqueueable(limit as i64, MAX_RETRIES)
            .await?;
        if ids.is_empty() {
            return Ok(ReconcileResult::default());
        }

        self.ctx.queue.purge_terminal(&ids).await?;
        let enqueued = self.enqueue_each(&ids).await?;

        info!(
            subsystem = "reconcile",
            op = "enqueue_all_pending",
            found = ids.len(),
            enqueued,
            duration_ms = start.elapsed().as_millis() as u64,
            "Pending rows enqueued"
        );
        self.ctx.publish_stats().await;
        Ok(ReconcileResult {
            found: ids.len(),
            enqueued,
        })
    }

    /// Find described files lacking a usable row and enqueue them.
    ///
    /// Files that already have a live job are not counted, so running the
    /// sweep twice without intervening changes finds nothing the second time.
    /// Candidates are paged by file id until `limit` files without a live job
    /// are collected or the candidates run out.
    pub async fn reconcile_missing(&self, limit: usize, dry_run: bool) -> Result<ReconcileResult> {
        let start = Instant::now();
        let page_size = limit.max(1) as i64;
        let mut selected = Vec::new();
        let mut cursor: Option<String> = None;

        while selected.len() < limit {
            let page = self
                .ctx
                .stores
                .vectors
                .reconcile_candidates(cursor.as_deref(), page_size, MAX_RETRIES)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.file_id.clone());
            let exhausted = (page.len() as i64) < page_size;

            let ids: Vec<String> = page.iter().map(|c| c.file_id.clone()).collect();
            let live = self.ctx.queue.live_jobs(&ids).await?;
            let room = limit - selected.len();
            selected.extend(
                page.into_iter()
                    .filter(|c| !live.contains(&c.file_id))
                    .take(room),
            );
            if exhausted {
                break;
            }
        }

        let found = selected.len();
        if dry_run || selected.is_empty() {
            info!(
                subsystem = "reconcile",
                op = "reconcile_missing",
                found,
                dry_run,
                "Missing vectors scanned"
            );
            return Ok(ReconcileResult { found, enqueued: 0 });
        }

        let (model, dimension) = self.ctx.model_and_dimension();
        let mut enqueued = 0;
        for candidate in &selected {
            if !candidate.has_vector {
                self.ctx
                    .stores
                    .vectors
                    .ensure_pending(&candidate.file_id, &candidate.description, &model, dimension)
                    .await?;
            }
            self.ctx
                .queue
                .enqueue_unique(&candidate.file_id, Duration::ZERO)
                .await?;
            enqueued += 1;
        }

        info!(
            subsystem = "reconcile",
            op = "reconcile_missing",
            found,
            enqueued,
            duration_ms = start.elapsed().as_millis() as u64,
            "Missing vectors enqueued"
        );
        self.ctx.publish_stats().await;
        Ok(ReconcileResult { found, enqueued })
    }

    /// Delete points whose file no longer exists.
    pub async fn clean_orphans(&self, limit: usize, dry_run: bool) -> Result<OrphanResult> {
        let start = Instant::now();
        let point_ids = self.ctx.vector_store.scroll_all_ids(limit).await?;

        let mut existing = HashSet::new();
        for chunk in point_ids.chunks(EXISTENCE_CHUNK) {
            existing.extend(self.ctx.stores.files.existing_ids(chunk).await?);
        }
        let orphans: Vec<&String> = point_ids
            .iter()
            .filter(|id| !existing.contains(*id))
            .collect();

        let found = orphans.len();
        let mut removed = 0;
        if !dry_run {
            for id in &orphans {
                match self.ctx.vector_store.delete(id).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(
                        subsystem = "reconcile",
                        op = "clean_orphans",
                        file_id = %id,
                        error = %e,
                        "Orphan delete failed"
                    ),
                }
            }
        }

        info!(
            subsystem = "reconcile",
            op = "clean_orphans",
            scanned = point_ids.len(),
            found,
            removed,
            dry_run,
            duration_ms = start.elapsed().as_millis() as u64,
            "Orphan sweep finished"
        );
        Ok(OrphanResult { found, removed })
    }

    /// Enqueue the oldest `stale` rows.
    pub async fn rebuild_stale(&self, limit: usize) -> Result<ReconcileResult> {
        let ids = self
            .ctx
            .stores
            .vectors
            .list_ids_by_status(VectorStatus::Stale, limit as i64)
            .await?;
        let enqueued = self.enqueue_each(&ids).await?;
        info!(
            subsystem = "reconcile",
            op = "rebuild_stale",
            found = ids.len(),
            enqueued,
            "Stale rows enqueued"
        );
        Ok(ReconcileResult {
            found: ids.len(),
            enqueued,
        })
    }
}

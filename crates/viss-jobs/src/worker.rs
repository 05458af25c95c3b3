//! Worker pool turning queued file ids into stored vectors.
//!
//! Each worker owns a slot index. The pool spawns slots `0..concurrency`;
//! when the target shrinks, workers whose slot is at or above it exit on
//! their next iteration, and growing the target spawns only the missing
//! slots.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use viss_core::defaults::{
    retry_backoff, LEASE_DURATION, MAX_RETRIES, PAUSED_REDELIVERY_DELAY, WORKER_IDLE_SLEEP,
};
use viss_core::{Error, Lease, LogAction, ProcessingLogEntry, Result, VectorPayload};

use crate::context::EngineContext;
use crate::propagate::propagate_to_duplicates;

/// Backoff after a queue error before polling again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What one worker cycle did with a fetched job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Vector stored; row is `completed`.
    Completed,
    /// Missing description or file; job acknowledged.
    Skipped,
    /// Fetched while paused and handed back to the queue.
    Deferred,
    /// Transient failure; redelivery scheduled after `delay`.
    Retrying { retry_count: i32, delay: Duration },
    /// Terminal failure; row is `failed`.
    Failed { reason: String },
}

/// Fetch at most one job and process it.
///
/// Returns `None` when the queue had nothing due within the poll interval.
pub async fn run_once(ctx: &EngineContext) -> Result<Option<JobOutcome>> {
    let Some(lease) = ctx.queue.fetch(LEASE_DURATION).await? else {
        return Ok(None);
    };
    ctx.pool.enter();
    ctx.metrics.active_workers.set(ctx.pool.active());
    let outcome = process_lease(ctx, &lease).await;
    ctx.metrics.active_workers.set(ctx.pool.leave());
    outcome.map(Some)
}

/// Steps 3 onwards of the worker loop for one leased job.
pub async fn process_lease(ctx: &EngineContext, lease: &Lease) -> Result<JobOutcome> {
    let file_id = lease.file_id.as_str();

    if ctx.pool.is_paused() {
        ctx.queue
            .nack(lease, PAUSED_REDELIVERY_DELAY, false, "paused")
            .await?;
        debug!(subsystem = "worker", file_id, "Paused, job handed back");
        return Ok(JobOutcome::Deferred);
    }

    let description = match ctx.stores.files.get_ai_info(file_id).await? {
        Some(info) if !info.description.trim().is_empty() => info.description,
        Some(_) => {
            let err = Error::Data("description is empty".to_string());
            return skip_job(ctx, lease, err).await;
        }
        None => {
            let err = Error::Data("no AI info for file".to_string());
            return skip_job(ctx, lease, err).await;
        }
    };
    let Some(file) = ctx.stores.files.get_file(file_id).await? else {
        let err = Error::Data("file no longer exists".to_string());
        return skip_job(ctx, lease, err).await;
    };

    let (model, dimension) = ctx.model_and_dimension();
    ctx.stores
        .vectors
        .ensure_pending(file_id, &description, &model, dimension)
        .await?;
    ctx.stores.vectors.mark_processing(file_id).await?;
    ctx.publish_stats().await;

    if let Err(e) = ensure_pipeline_ready(ctx) {
        let reason = e.to_string();
        warn!(
            subsystem = "worker",
            file_id,
            reason = %reason,
            "Pipeline not configured, job failed"
        );
        ctx.stores.vectors.mark_failed(file_id, &reason).await?;
        ctx.queue.ack(lease).await?;
        ctx.log(
            ProcessingLogEntry::new(file_id, LogAction::Retry, "worker")
                .with_model(&model)
                .with_error_code(e.code())
                .with_data(json!({ "error": reason })),
        )
        .await;
        ctx.publish_stats().await;
        return Ok(JobOutcome::Failed { reason });
    }

    let start = Instant::now();
    let stored = embed_and_store(ctx, file_id, file.user_id, &description).await;
    let duration_ms = start.elapsed().as_millis() as i64;

    let outcome = match stored {
        Ok((model, dimension)) => {
            ctx.stores
                .vectors
                .mark_completed(file_id, &description, &model, dimension)
                .await?;
            ctx.queue.ack(lease).await?;
            ctx.metrics.ack_total.inc();
            info!(
                subsystem = "worker",
                file_id,
                attempt = lease.attempts + 1,
                duration_ms,
                "Vector stored"
            );
            ctx.log(
                ProcessingLogEntry::new(file_id, LogAction::Store, "worker")
                    .with_model(&model)
                    .with_duration_ms(duration_ms)
                    .with_data(json!({ "dimension": dimension })),
            )
            .await;

            let propagate_ctx = ctx.clone();
            let parent = file_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = propagate_to_duplicates(&propagate_ctx, &parent).await {
                    warn!(
                        subsystem = "worker",
                        component = "propagate",
                        file_id = %parent,
                        error = %e,
                        "Duplicate propagation failed"
                    );
                }
            });
            JobOutcome::Completed
        }
        Err(e) => handle_failure(ctx, lease, &model, duration_ms, e).await?,
    };

    ctx.publish_stats().await;
    Ok(outcome)
}

/// Acknowledge a job whose input data is gone; never retried.
async fn skip_job(ctx: &EngineContext, lease: &Lease, err: Error) -> Result<JobOutcome> {
    let file_id = lease.file_id.as_str();
    debug!(subsystem = "worker", file_id, reason = %err, "Nothing to embed, job acknowledged");
    ctx.queue.ack(lease).await?;
    ctx.log(
        ProcessingLogEntry::new(file_id, LogAction::Store, "worker")
            .with_error_code(err.code())
            .with_data(json!({ "skipped": err.to_string() })),
    )
    .await;
    Ok(JobOutcome::Skipped)
}

/// Master switch, provider credentials, and vector store must all be usable.
fn ensure_pipeline_ready(ctx: &EngineContext) -> Result<()> {
    if !ctx.registry.settings().enabled {
        return Err(Error::Config("vector service is disabled".to_string()));
    }
    ctx.provider.ensure_ready()?;
    ctx.vector_store.ensure_ready()
}

async fn embed_and_store(
    ctx: &EngineContext,
    file_id: &str,
    user_id: i64,
    description: &str,
) -> Result<(String, i32)> {
    let vector = ctx.provider.embed(description).await?;
    let model = ctx.provider.model();

    let payload = VectorPayload {
        file_id: file_id.to_string(),
        description: description.to_string(),
        model: model.clone(),
        user_id,
    };
    ctx.vector_store.upsert(file_id, &vector, &payload).await?;
    Ok((model, i32::try_from(vector.len()).unwrap_or(i32::MAX)))
}

async fn handle_failure(
    ctx: &EngineContext,
    lease: &Lease,
    model: &str,
    duration_ms: i64,
    err: Error,
) -> Result<JobOutcome> {
    let file_id = lease.file_id.as_str();
    let reason = err.to_string();

    if !err.is_retryable() {
        warn!(subsystem = "worker", file_id, error = %reason, "Non-retryable failure, job failed");
        ctx.stores.vectors.mark_failed(file_id, &reason).await?;
        ctx.queue.ack(lease).await?;
        ctx.log(
            ProcessingLogEntry::new(file_id, LogAction::Retry, "worker")
                .with_model(model)
                .with_duration_ms(duration_ms)
                .with_error_code(err.code())
                .with_data(json!({ "error": reason })),
        )
        .await;
        return Ok(JobOutcome::Failed { reason });
    }

    let retry_count = ctx
        .stores
        .vectors
        .increment_retry(file_id, MAX_RETRIES)
        .await?;
    ctx.metrics.nack_total.inc();
    ctx.log(
        ProcessingLogEntry::new(file_id, LogAction::Retry, "worker")
            .with_model(model)
            .with_duration_ms(duration_ms)
            .with_error_code(err.code())
            .with_data(json!({ "error": reason, "retry_count": retry_count })),
    )
    .await;

    if retry_count >= MAX_RETRIES {
        error!(
            subsystem = "worker",
            file_id,
            retry_count,
            error = %reason,
            "Retries exhausted, job failed"
        );
        ctx.stores.vectors.mark_failed(file_id, &reason).await?;
        ctx.queue.ack(lease).await?;
        return Ok(JobOutcome::Failed { reason });
    }

    let delay = retry_backoff(retry_count);
    warn!(
        subsystem = "worker",
        file_id,
        retry_count,
        delay_ms = delay.as_millis() as u64,
        error = %reason,
        "Attempt failed, retry scheduled"
    );
    ctx.queue.nack(lease, delay, false, &reason).await?;
    ctx.stores.vectors.mark_pending(file_id, &reason).await?;
    Ok(JobOutcome::Retrying { retry_count, delay })
}

/// Live set of cooperative workers sharing one queue.
pub struct WorkerPool {
    ctx: EngineContext,
    slots: Arc<Mutex<BTreeSet<usize>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(ctx: EngineContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            slots: Arc::new(Mutex::new(BTreeSet::new())),
            handles: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    fn slots(&self) -> MutexGuard<'_, BTreeSet<usize>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of worker tasks currently alive.
    pub fn live_workers(&self) -> usize {
        self.slots().len()
    }

    /// Spawn workers up to the configured concurrency.
    pub fn start(&self) {
        let target = self.ctx.pool.concurrency();
        self.ctx.metrics.configured_concurrency.set(target as i64);
        self.ctx
            .metrics
            .paused
            .set(i64::from(self.ctx.pool.is_paused()));
        let spawned = self.spawn_missing(target);
        info!(subsystem = "worker", concurrency = target, spawned, "Worker pool started");
    }

    /// Change the target worker count. Returns the number of workers spawned.
    pub fn resize(&self, n: usize) -> usize {
        let previous = self.ctx.pool.set_concurrency(n);
        self.ctx.metrics.configured_concurrency.set(n as i64);
        let spawned = if *self.shutdown.borrow() {
            0
        } else {
            self.spawn_missing(n)
        };
        if previous != n {
            info!(subsystem = "worker", from = previous, to = n, spawned, "Worker pool resized");
        }
        spawned
    }

    /// Toggle pause. Returns the previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        let previous = self.ctx.pool.set_paused(paused);
        self.ctx.metrics.paused.set(i64::from(paused));
        if previous != paused {
            info!(subsystem = "worker", paused, "Worker pool pause toggled");
        }
        previous
    }

    fn spawn_missing(&self, target: usize) -> usize {
        let mut slots = self.slots();
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());

        let mut spawned = 0;
        for slot in 0..target {
            if slots.insert(slot) {
                let ctx = self.ctx.clone();
                let live = self.slots.clone();
                let shutdown = self.shutdown.subscribe();
                handles.push(tokio::spawn(worker_loop(ctx, slot, live, shutdown)));
                spawned += 1;
            }
        }
        spawned
    }

    /// Stop every worker and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(subsystem = "worker", error = ?e, "Worker task panicked");
            }
        }
        info!(subsystem = "worker", "Worker pool stopped");
    }
}

async fn idle(shutdown: &mut watch::Receiver<bool>, d: Duration) {
    tokio::select! {
        _ = shutdown.changed() => {}
        _ = sleep(d) => {}
    }
}

async fn worker_loop(
    ctx: EngineContext,
    slot: usize,
    live: Arc<Mutex<BTreeSet<usize>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(subsystem = "worker", worker = slot, "Worker started");

    loop {
        if *shutdown.borrow() || slot >= ctx.pool.concurrency() {
            // Re-check under the slot lock so a concurrent resize either sees
            // this slot gone or keeps this worker alive.
            let mut slots = live.lock().unwrap_or_else(|e| e.into_inner());
            if !*shutdown.borrow() && slot < ctx.pool.concurrency() {
                continue;
            }
            slots.remove(&slot);
            break;
        }
        if ctx.pool.is_paused() || !ctx.registry.settings().enabled {
            idle(&mut shutdown, WORKER_IDLE_SLEEP).await;
            continue;
        }

        match run_once(&ctx).await {
            Ok(Some(outcome)) => {
                debug!(subsystem = "worker", worker = slot, ?outcome, "Job processed");
            }
            Ok(None) => idle(&mut shutdown, WORKER_IDLE_SLEEP).await,
            Err(e) => {
                error!(subsystem = "worker", worker = slot, error = %e, "Worker cycle failed");
                idle(&mut shutdown, QUEUE_ERROR_BACKOFF).await;
            }
        }
    }

    debug!(subsystem = "worker", worker = slot, "Worker stopped");
}

//! Verification tasks labelling each row `verified` or `missing`.
//!
//! A task is created `pending` with its `total_count` computed under its
//! filter, then run: rows are walked in `(created_at, file_id)` order in
//! batches, each checked against the vector store. Only one task may run at
//! a time, enforced by the task table and a process-local lock.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use viss_core::defaults::{VERIFY_BATCH_PAUSE, VERIFY_BATCH_SIZE, VERIFY_STOPPED_REASON};
use viss_core::{
    ActualStatus, Error, LogAction, ProcessingLogEntry, Result, TaskProgress, TaskStatus, TaskType,
    VectorEvent, VerificationFilter, VerificationTask, VerifyCursor,
};

use crate::context::EngineContext;

/// Rows reset per page by batch repair.
const REPAIR_PAGE: i64 = 500;

struct RunningTask {
    task_id: String,
    stop: watch::Sender<bool>,
}

/// Creates, runs, and stops verification tasks; repairs flagged rows.
pub struct VerificationService {
    ctx: EngineContext,
    running: Mutex<Option<RunningTask>>,
}

impl VerificationService {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            running: Mutex::new(None),
        }
    }

    /// Create a `pending` task. Rejected while another task is running.
    pub async fn create_task(
        &self,
        filter: VerificationFilter,
        task_type: Option<TaskType>,
        creator_id: Option<i64>,
        batch_size: Option<i32>,
    ) -> Result<VerificationTask> {
        if let Some(running) = self.ctx.stores.tasks.find_running().await? {
            return Err(Error::Conflict(format!(
                "verification task {} is already running",
                running.task_id
            )));
        }
        if let VerificationFilter::FileIds(ids) = &filter {
            if ids.is_empty() {
                return Err(Error::InvalidInput("file_ids must not be empty".to_string()));
            }
        }

        let total_count = self
            .ctx
            .stores
            .vectors
            .count_for_verification(&filter)
            .await?;
        let task = VerificationTask {
            task_id: Uuid::now_v7().to_string(),
            task_type: task_type.unwrap_or_else(|| filter.default_task_type()),
            status: TaskStatus::Pending,
            creator_id,
            filter_conditions: filter.to_json(),
            total_count,
            processed_count: 0,
            verified_count: 0,
            missing_count: 0,
            error_count: 0,
            batch_size: batch_size
                .filter(|n| *n > 0)
                .unwrap_or(VERIFY_BATCH_SIZE),
            error_message: String::new(),
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        self.ctx.stores.tasks.create(&task).await?;

        info!(
            subsystem = "verification",
            task_id = %task.task_id,
            task_type = task.task_type.as_str(),
            total_count,
            "Verification task created"
        );
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<VerificationTask> {
        self.ctx
            .stores
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("verification task {task_id}")))
    }

    pub async fn list_tasks(&self, limit: i64, offset: i64) -> Result<Vec<VerificationTask>> {
        self.ctx.stores.tasks.list(limit, offset).await
    }

    /// Id of the task this process is running, if any.
    pub async fn running_task_id(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.task_id.clone())
    }

    /// Run a pending task to completion on the current task.
    pub async fn run_task(&self, task_id: &str) -> Result<VerificationTask> {
        let stop_rx = {
            let mut running = self.running.lock().await;
            if let Some(current) = running.as_ref() {
                return Err(Error::Conflict(format!(
                    "verification task {} is already running",
                    current.task_id
                )));
            }
            let task = self.get_task(task_id).await?;
            if task.status != TaskStatus::Pending {
                return Err(Error::Conflict(format!(
                    "verification task {task_id} is {}",
                    task.status.as_str()
                )));
            }
            self.ctx.stores.tasks.mark_running(task_id).await?;
            let (stop, stop_rx) = watch::channel(false);
            *running = Some(RunningTask {
                task_id: task_id.to_string(),
                stop,
            });
            stop_rx
        };

        let result = self.execute(task_id, stop_rx).await;
        self.running.lock().await.take();

        if let Err(e) = &result {
            error!(subsystem = "verification", task_id, error = %e, "Verification task failed");
            if let Err(finish_err) = self
                .ctx
                .stores
                .tasks
                .finish(task_id, TaskStatus::Failed, &e.to_string(), &TaskProgress::default())
                .await
            {
                warn!(
                    subsystem = "verification",
                    task_id,
                    error = %finish_err,
                    "Failed to record task failure"
                );
            }
        }
        result?;
        self.get_task(task_id).await
    }

    /// Stop a running task, or cancel a pending one. Returns false when the
    /// task is already terminal.
    pub async fn stop_task(&self, task_id: &str) -> Result<bool> {
        {
            let running = self.running.lock().await;
            if let Some(current) = running.as_ref().filter(|r| r.task_id == task_id) {
                let _ = current.stop.send(true);
                info!(subsystem = "verification", task_id, "Stop requested");
                return Ok(true);
            }
        }

        let task = self.get_task(task_id).await?;
        match task.status {
            TaskStatus::Pending => {
                self.ctx
                    .stores
                    .tasks
                    .finish(task_id, TaskStatus::Cancelled, "", &TaskProgress::default())
                    .await?;
                info!(subsystem = "verification", task_id, "Pending task cancelled");
                Ok(true)
            }
            TaskStatus::Running => Err(Error::Conflict(format!(
                "verification task {task_id} is running in another process"
            ))),
            _ => Ok(false),
        }
    }

    async fn execute(&self, task_id: &str, stop: watch::Receiver<bool>) -> Result<()> {
        let started = Instant::now();
        let task = self.get_task(task_id).await?;
        let filter = VerificationFilter::from_json(&task.filter_conditions)?;
        let batch_size = i64::from(task.batch_size.max(1));

        info!(
            subsystem = "verification",
            task_id,
            total = task.total_count,
            batch_size,
            "Verification task started"
        );

        let mut progress = TaskProgress::default();
        let mut cursor: Option<VerifyCursor> = None;
        let mut stopped = false;

        loop {
            if *stop.borrow() {
                stopped = true;
                break;
            }

            let rows = self
                .ctx
                .stores
                .vectors
                .list_for_verification(&filter, cursor.as_ref(), batch_size)
                .await?;
            if rows.is_empty() {
                break;
            }
            let page_len = rows.len() as i64;

            for row in rows {
                if *stop.borrow() {
                    stopped = true;
                    break;
                }
                let (actual, error) = match self.ctx.vector_store.exists(&row.file_id).await {
                    Ok(true) => {
                        progress.verified += 1;
                        (ActualStatus::Verified, String::new())
                    }
                    Ok(false) => {
                        progress.missing += 1;
                        let err =
                            Error::Consistency("point missing from vector store".to_string());
                        (ActualStatus::Missing, err.to_string())
                    }
                    Err(e) => {
                        progress.errors += 1;
                        (ActualStatus::Missing, e.to_string())
                    }
                };
                trace!(
                    subsystem = "verification",
                    task_id,
                    file_id = %row.file_id,
                    actual = actual.as_str(),
                    "Row verified"
                );
                self.ctx
                    .stores
                    .vectors
                    .record_verification(&row.file_id, actual, &error)
                    .await?;
                progress.processed += 1;
                cursor = Some(VerifyCursor {
                    created_at: row.created_at,
                    file_id: row.file_id,
                });
            }

            self.ctx
                .stores
                .tasks
                .update_progress(task_id, &progress)
                .await?;
            self.ctx.bus.publish(VectorEvent::VerificationProgress {
                task_id: task_id.to_string(),
                processed: progress.processed,
                total: task.total_count,
            });
            debug!(
                subsystem = "verification",
                task_id,
                processed = progress.processed,
                "Batch verified"
            );

            if stopped || page_len < batch_size {
                break;
            }
            let mut stop_wait = stop.clone();
            tokio::select! {
                _ = stop_wait.changed() => {}
                _ = tokio::time::sleep(VERIFY_BATCH_PAUSE) => {}
            }
        }

        let (status, message) = if stopped {
            (TaskStatus::Failed, VERIFY_STOPPED_REASON)
        } else {
            (TaskStatus::Completed, "")
        };
        self.ctx
            .stores
            .tasks
            .finish(task_id, status, message, &progress)
            .await?;

        let duration_ms = started.elapsed().as_millis() as i64;
        info!(
            subsystem = "verification",
            task_id,
            status = status.as_str(),
            processed = progress.processed,
            verified = progress.verified,
            missing = progress.missing,
            errors = progress.errors,
            duration_ms,
            "Verification task finished"
        );
        self.ctx
            .log(
                ProcessingLogEntry::new("", LogAction::Verify, task.task_type.as_str())
                    .with_task_id(task_id)
                    .with_duration_ms(duration_ms)
                    .with_data(json!({
                        "status": status.as_str(),
                        "processed": progress.processed,
                        "verified": progress.verified,
                        "missing": progress.missing,
                        "errors": progress.errors,
                    })),
            )
            .await;
        self.ctx.publish_stats().await;
        Ok(())
    }

    /// Reset a row flagged missing and enqueue it.
    pub async fn repair_missing(&self, file_id: &str) -> Result<()> {
        let row = self
            .ctx
            .stores
            .vectors
            .get(file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file_vector {file_id}")))?;
        if row.actual_status != ActualStatus::Missing {
            return Err(Error::InvalidInput(format!(
                "file_vector {file_id} is {}, not missing",
                row.actual_status
            )));
        }

        self.ctx.stores.vectors.reset_for_repair(file_id).await?;
        self.ctx
            .queue
            .enqueue_unique(file_id, Duration::ZERO)
            .await?;
        self.ctx
            .log(
                ProcessingLogEntry::new(file_id, LogAction::Reset, "repair")
                    .with_data(json!({ "actual_status": row.actual_status.as_str() })),
            )
            .await;
        info!(subsystem = "verification", file_id, "Missing vector queued for repair");
        Ok(())
    }

    /// Reset every completed row labelled missing (and unknown when
    /// `include_unknown`) and enqueue it. Returns rows repaired.
    pub async fn batch_repair(&self, include_unknown: bool) -> Result<usize> {
        let mut repaired = 0;
        loop {
            let ids = self
                .ctx
                .stores
                .vectors
                .list_problem_ids(include_unknown, REPAIR_PAGE)
                .await?;
            if ids.is_empty() {
                break;
            }
            let mut progressed = false;
            for id in &ids {
                if self.ctx.stores.vectors.reset_for_repair(id).await? {
                    progressed = true;
                    repaired += 1;
                }
                self.ctx.queue.enqueue_unique(id, Duration::ZERO).await?;
            }
            if !progressed {
                break;
            }
        }

        if repaired > 0 {
            self.ctx
                .log(
                    ProcessingLogEntry::new("", LogAction::Reset, "batch_repair").with_data(
                        json!({ "repaired": repaired, "include_unknown": include_unknown }),
                    ),
                )
                .await;
        }
        info!(
            subsystem = "verification",
            repaired,
            include_unknown,
            "Problem vectors queued for repair"
        );
        self.ctx.publish_stats().await;
        Ok(repaired)
    }
}

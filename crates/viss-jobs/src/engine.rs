//! The vector engine: one registry owning the pipeline for the process.
//!
//! Lifecycle is `build → init → start → shutdown`. Everything an admin
//! surface needs (sweeps, verification, pause, resize, retries, recovery)
//! is a method here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use viss_core::defaults::{
    CONFIG_GROUP, MAX_CONCURRENCY, MAX_RETRIES, ORPHAN_SCAN_LIMIT, RECONCILE_LIMIT,
    STUCK_THRESHOLD,
};
use viss_core::{
    keys, ConfigRegistry, EmbeddingProvider, Error, JobQueue, LogAction, MetadataStores,
    ProcessingLogEntry, Result, StatsBus, TaskType, VectorEvent, VectorMetrics, VectorStats,
    VectorStatus, VectorStore, VerificationFilter, VerificationTask,
};
use viss_inference::OpenAIEmbeddingClient;
use viss_vector::VectorStoreSlot;

use crate::context::{EngineContext, PoolState};
use crate::queue::MemoryJobQueue;
use crate::reaper::spawn_reaper;
use crate::reconcile::{OrphanResult, ReconcileResult, Reconciler};
use crate::scheduler::{spawn_scheduler, Schedule, ScheduledJob};
use crate::verification::VerificationService;
use crate::watcher::ConfigWatcher;
use crate::worker::WorkerPool;

/// Rows handled per page by the bulk admin operations.
const ADMIN_PAGE: i64 = 500;

/// Reachability of one collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub ok: bool,
    pub detail: String,
}

impl ComponentHealth {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                detail: "ok".to_string(),
            },
            Err(e) => Self {
                ok: false,
                detail: e.to_string(),
            },
        }
    }
}

/// Snapshot returned by [`VectorEngine::health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub enabled: bool,
    pub paused: bool,
    pub provider: ComponentHealth,
    pub vector_store: ComponentHealth,
    pub queue: ComponentHealth,
    pub queue_backend: &'static str,
    pub active_workers: i64,
    pub configured_concurrency: usize,
}

impl HealthReport {
    /// True when every collaborator is usable and the master switch is on.
    pub fn is_healthy(&self) -> bool {
        self.enabled && self.provider.ok && self.vector_store.ok && self.queue.ok
    }
}

/// Assembles a [`VectorEngine`] from its collaborators.
///
/// Only the metadata stores are required. The provider defaults to the
/// OpenAI-compatible client, the vector store to a slot rebuilt from
/// settings, and the queue to the in-memory backend.
pub struct VectorEngineBuilder {
    stores: MetadataStores,
    registry: Option<Arc<ConfigRegistry>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    slot: Option<Arc<VectorStoreSlot>>,
    queue: Option<Arc<dyn JobQueue>>,
    scheduler: bool,
}

impl VectorEngineBuilder {
    pub fn new(stores: MetadataStores) -> Self {
        Self {
            stores,
            registry: None,
            provider: None,
            slot: None,
            queue: None,
            scheduler: true,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ConfigRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Pin the vector store; config changes no longer rebuild it.
    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.slot = Some(Arc::new(VectorStoreSlot::fixed(store)));
        self
    }

    pub fn with_vector_slot(mut self, slot: Arc<VectorStoreSlot>) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Enable or disable the periodic sweeps (enabled by default).
    pub fn with_scheduler(mut self, enabled: bool) -> Self {
        self.scheduler = enabled;
        self
    }

    pub fn build(self) -> Result<VectorEngine> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ConfigRegistry::with_defaults()));
        let provider: Arc<dyn EmbeddingProvider> = match self.provider {
            Some(p) => p,
            None => Arc::new(OpenAIEmbeddingClient::new(registry.clone())?),
        };
        let slot = self
            .slot
            .unwrap_or_else(|| Arc::new(VectorStoreSlot::dynamic()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(MemoryJobQueue::new()));

        let settings = registry.settings();
        let ctx = EngineContext {
            stores: self.stores,
            provider: provider.clone(),
            vector_store: slot.clone(),
            queue,
            registry: registry.clone(),
            metrics: VectorMetrics::new()?,
            bus: StatsBus::default(),
            pool: Arc::new(PoolState::new(
                settings.concurrency,
                !settings.auto_processing,
            )),
        };

        let pool = Arc::new(WorkerPool::new(ctx.clone()));
        let reconciler = Reconciler::new(ctx.clone());
        let verification = Arc::new(VerificationService::new(ctx.clone()));
        let watcher = ConfigWatcher::new(
            registry,
            pool.clone(),
            reconciler.clone(),
            provider,
            Some(slot.clone()),
        );
        let (shutdown, _) = watch::channel(false);

        Ok(VectorEngine {
            ctx,
            slot,
            pool,
            reconciler,
            verification,
            watcher,
            scheduler: self.scheduler,
            started: AtomicBool::new(false),
            shutdown,
            handles: Mutex::new(Vec::new()),
        })
    }
}

/// Process-wide owner of the indexing pipeline.
pub struct VectorEngine {
    ctx: EngineContext,
    slot: Arc<VectorStoreSlot>,
    pool: Arc<WorkerPool>,
    reconciler: Reconciler,
    verification: Arc<VerificationService>,
    watcher: ConfigWatcher,
    scheduler: bool,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl VectorEngine {
    pub fn builder(stores: MetadataStores) -> VectorEngineBuilder {
        VectorEngineBuilder::new(stores)
    }

    /// Apply persisted settings and prepare the vector store.
    ///
    /// An unreachable vector store is logged, not returned: the worker marks
    /// jobs failed until the store comes back and a reload reconnects it.
    pub async fn init(&self) -> Result<()> {
        let persisted = self.ctx.stores.config.load_group(CONFIG_GROUP).await?;
        self.ctx.registry.apply_persisted(CONFIG_GROUP, persisted);

        let settings = self.ctx.registry.settings();
        self.ctx.pool.set_concurrency(settings.concurrency);
        self.ctx.pool.set_paused(!settings.auto_processing);

        if settings.enabled {
            if let Err(e) = self
                .slot
                .refresh(&settings, self.ctx.provider.dimension())
                .await
            {
                warn!(
                    subsystem = "engine",
                    op = "init",
                    error = %e,
                    "Vector store not ready"
                );
            }
        }

        info!(
            subsystem = "engine",
            op = "init",
            enabled = settings.enabled,
            concurrency = settings.concurrency,
            paused = !settings.auto_processing,
            model = %settings.model,
            queue = self.ctx.queue.name(),
            "Vector engine initialized"
        );
        Ok(())
    }

    /// Spawn the reaper, workers, config watcher, scheduler, and an initial sweep.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(subsystem = "engine", "Vector engine already started");
            return;
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.push(spawn_reaper(
            self.ctx.queue.clone(),
            self.shutdown.subscribe(),
        ));
        self.pool.start();
        handles.push(self.watcher.clone().spawn(self.shutdown.subscribe()));
        if self.scheduler {
            handles.extend(spawn_scheduler(
                self.scheduled_jobs(),
                self.shutdown.subscribe(),
            ));
        }

        let reconciler = self.reconciler.clone();
        let registry = self.ctx.registry.clone();
        handles.push(tokio::spawn(async move {
            if !registry.settings().enabled {
                return;
            }
            if let Err(e) = reconciler.enqueue_all_pending(RECONCILE_LIMIT).await {
                warn!(
                    subsystem = "engine",
                    op = "startup_sweep",
                    error = %e,
                    "Startup sweep failed"
                );
            }
            if let Err(e) = reconciler.reconcile_missing(RECONCILE_LIMIT, false).await {
                warn!(
                    subsystem = "engine",
                    op = "startup_sweep",
                    error = %e,
                    "Startup sweep failed"
                );
            }
        }));

        info!(
            subsystem = "engine",
            op = "start",
            scheduler = self.scheduler,
            "Vector engine started"
        );
    }

    /// Stop background tasks and wait for in-flight jobs.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.pool.shutdown().await;
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(subsystem = "engine", error = ?e, "Background task panicked");
            }
        }
        info!(subsystem = "engine", op = "shutdown", "Vector engine stopped");
    }

    fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        let quarter_hour = Duration::from_secs(15 * 60);

        let pending = self.reconciler.clone();
        let missing = self.reconciler.clone();
        let orphans = self.reconciler.clone();
        let verification = self.verification.clone();

        vec![
            ScheduledJob::new(
                "enqueue_all_pending",
                Schedule::Every {
                    period: quarter_hour,
                    offset: Duration::ZERO,
                },
                move || {
                    let r = pending.clone();
                    async move {
                        if let Err(e) = r.enqueue_all_pending(RECONCILE_LIMIT).await {
                            warn!(
                                subsystem = "scheduler",
                                job = "enqueue_all_pending",
                                error = %e,
                                "Scheduled sweep failed"
                            );
                        }
                    }
                    .boxed()
                },
            ),
            ScheduledJob::new(
                "reconcile_missing",
                Schedule::Every {
                    period: quarter_hour,
                    offset: quarter_hour / 2,
                },
                move || {
                    let r = missing.clone();
                    async move {
                        if let Err(e) = r.reconcile_missing(RECONCILE_LIMIT, false).await {
                            warn!(
                                subsystem = "scheduler",
                                job = "reconcile_missing",
                                error = %e,
                                "Scheduled sweep failed"
                            );
                        }
                    }
                    .boxed()
                },
            ),
            ScheduledJob::new(
                "clean_orphans",
                Schedule::DailyAt { hour: 3, minute: 30 },
                move || {
                    let r = orphans.clone();
                    async move {
                        if let Err(e) = r.clean_orphans(ORPHAN_SCAN_LIMIT, false).await {
                            warn!(
                                subsystem = "scheduler",
                                job = "clean_orphans",
                                error = %e,
                                "Scheduled sweep failed"
                            );
                        }
                    }
                    .boxed()
                },
            ),
            ScheduledJob::new(
                "scheduled_verification",
                Schedule::DailyAt { hour: 0, minute: 0 },
                move || {
                    let v = verification.clone();
                    async move { run_scheduled_verification(&v).await }.boxed()
                },
            ),
        ]
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn verification(&self) -> &Arc<VerificationService> {
        &self.verification
    }

    pub fn watcher(&self) -> &ConfigWatcher {
        &self.watcher
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.ctx.registry
    }

    /// Stats and verification progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<VectorEvent> {
        self.ctx.bus.subscribe()
    }

    // =========================================================================
    // OBSERVABILITY
    // =========================================================================

    pub async fn stats(&self) -> Result<VectorStats> {
        self.ctx.snapshot().await
    }

    /// Prometheus text exposition with fresh queue gauges.
    pub async fn metrics_text(&self) -> Result<String> {
        match self.ctx.queue.metrics().await {
            Ok(queue) => self.ctx.metrics.observe_queue(&queue),
            Err(e) => warn!(subsystem = "engine", error = %e, "Queue metrics unavailable"),
        }
        self.ctx.metrics.render()
    }

    pub async fn health(&self) -> HealthReport {
        let settings = self.ctx.registry.settings();
        let provider = ComponentHealth::from_result(self.ctx.provider.ensure_ready());
        let store_result = match self.ctx.vector_store.ensure_ready() {
            Ok(()) => self.ctx.vector_store.health().await,
            Err(e) => Err(e),
        };
        let vector_store = ComponentHealth::from_result(store_result);
        let queue = ComponentHealth::from_result(self.ctx.queue.metrics().await.map(|_| ()));

        HealthReport {
            enabled: settings.enabled,
            paused: self.ctx.pool.is_paused(),
            provider,
            vector_store,
            queue,
            queue_backend: self.ctx.queue.name(),
            active_workers: self.ctx.pool.active(),
            configured_concurrency: self.ctx.pool.concurrency(),
        }
    }

    /// Most recent processing log entries for a file.
    pub async fn processing_logs(
        &self,
        file_id: &str,
        limit: i64,
    ) -> Result<Vec<ProcessingLogEntry>> {
        self.ctx.stores.logs.list_for_file(file_id, limit).await
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Persist a `vector` group value and publish it to the running pipeline.
    ///
    /// Returns false when the value was unchanged.
    pub async fn update_setting(&self, key: &str, value: JsonValue) -> Result<bool> {
        if !keys::ALL.contains(&key) {
            return Err(Error::InvalidInput(format!("unknown setting: {key}")));
        }
        self.ctx.stores.config.save(CONFIG_GROUP, key, &value).await?;
        Ok(self.ctx.registry.set(CONFIG_GROUP, key, value))
    }

    /// Persist and apply a new worker count.
    pub async fn set_concurrency(&self, n: usize) -> Result<()> {
        if n > MAX_CONCURRENCY {
            return Err(Error::InvalidInput(format!(
                "concurrency {n} exceeds {MAX_CONCURRENCY}"
            )));
        }
        self.update_setting(keys::CONCURRENCY, json!(n)).await?;
        if self.started.load(Ordering::SeqCst) {
            self.pool.resize(n);
        } else {
            self.ctx.pool.set_concurrency(n);
        }
        self.ctx.publish_stats().await;
        Ok(())
    }

    /// Persist and apply the pause flag. Returns the previous value.
    pub async fn set_paused(&self, paused: bool) -> Result<bool> {
        // The watcher may apply the change first; report the state seen on entry.
        let previous = self.ctx.pool.is_paused();
        self.update_setting(keys::AUTO_PROCESSING_ENABLED, json!(!paused))
            .await?;
        self.pool.set_paused(paused);
        self.ctx.publish_stats().await;
        Ok(previous)
    }

    /// Flip the pause flag. Returns the new value.
    pub async fn toggle_pause(&self) -> Result<bool> {
        let paused = !self.ctx.pool.is_paused();
        self.set_paused(paused).await?;
        Ok(paused)
    }

    // =========================================================================
    // SWEEPS
    // =========================================================================

    pub async fn enqueue_all_pending(&self, limit: usize) -> Result<ReconcileResult> {
        self.reconciler.enqueue_all_pending(limit).await
    }

    pub async fn reconcile_missing(&self, limit: usize, dry_run: bool) -> Result<ReconcileResult> {
        self.reconciler.reconcile_missing(limit, dry_run).await
    }

    pub async fn clean_orphans(&self, limit: usize, dry_run: bool) -> Result<OrphanResult> {
        self.reconciler.clean_orphans(limit, dry_run).await
    }

    pub async fn rebuild_stale(&self, limit: usize) -> Result<ReconcileResult> {
        self.reconciler.rebuild_stale(limit).await
    }

    // =========================================================================
    // VERIFICATION
    // =========================================================================

    pub async fn create_verification_task(
        &self,
        filter: VerificationFilter,
        task_type: Option<TaskType>,
        creator_id: Option<i64>,
        batch_size: Option<i32>,
    ) -> Result<VerificationTask> {
        self.verification
            .create_task(filter, task_type, creator_id, batch_size)
            .await
    }

    /// Run a pending task in the background and return at once.
    pub async fn start_verification_task(&self, task_id: &str) -> Result<VerificationTask> {
        if let Some(current) = self.verification.running_task_id().await {
            return Err(Error::Conflict(format!(
                "verification task {current} is already running"
            )));
        }
        let task = self.verification.get_task(task_id).await?;
        if task.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "verification task {task_id} is {}",
                task.status.as_str()
            )));
        }

        let verification = self.verification.clone();
        let id = task_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = verification.run_task(&id).await {
                warn!(
                    subsystem = "verification",
                    task_id = %id,
                    error = %e,
                    "Background verification ended with error"
                );
            }
        });
        Ok(task)
    }

    /// Run a pending task to completion.
    pub async fn run_verification_task(&self, task_id: &str) -> Result<VerificationTask> {
        self.verification.run_task(task_id).await
    }

    pub async fn stop_verification_task(&self, task_id: &str) -> Result<bool> {
        self.verification.stop_task(task_id).await
    }

    pub async fn get_verification_task(&self, task_id: &str) -> Result<VerificationTask> {
        self.verification.get_task(task_id).await
    }

    pub async fn list_verification_tasks(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VerificationTask>> {
        self.verification.list_tasks(limit, offset).await
    }

    pub async fn repair_missing(&self, file_id: &str) -> Result<()> {
        self.verification.repair_missing(file_id).await
    }

    pub async fn batch_repair(&self, include_unknown: bool) -> Result<usize> {
        self.verification.batch_repair(include_unknown).await
    }

    // =========================================================================
    // ROW ADMINISTRATION
    // =========================================================================

    /// Give a `failed` row a fresh retry budget and enqueue it.
    pub async fn retry_failed(&self, file_id: &str) -> Result<()> {
        let row = self
            .ctx
            .stores
            .vectors
            .get(file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file_vector {file_id}")))?;
        if row.status != VectorStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "file_vector {file_id} is {}, not failed",
                row.status
            )));
        }

        self.ctx.stores.vectors.reset_retry(file_id).await?;
        self.ctx
            .queue
            .enqueue_unique(file_id, Duration::ZERO)
            .await?;
        self.ctx
            .log(
                ProcessingLogEntry::new(file_id, LogAction::Retry, "admin").with_data(json!({
                    "previous_retry_count": row.retry_count,
                    "previous_error": row.error_message,
                })),
            )
            .await;
        info!(
            subsystem = "engine",
            op = "retry_failed",
            file_id,
            "Failed row requeued"
        );
        self.ctx.publish_stats().await;
        Ok(())
    }

    /// Requeue every `failed` row. Returns rows reset.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let mut retried = 0;
        loop {
            let ids = self
                .ctx
                .stores
                .vectors
                .list_ids_by_status(VectorStatus::Failed, ADMIN_PAGE)
                .await?;
            if ids.is_empty() {
                break;
            }
            let mut progressed = false;
            for id in &ids {
                if self.ctx.stores.vectors.reset_retry(id).await? {
                    progressed = true;
                    retried += 1;
                }
                self.ctx.queue.enqueue_unique(id, Duration::ZERO).await?;
            }
            if !progressed {
                break;
            }
        }

        if retried > 0 {
            self.ctx
                .log(
                    ProcessingLogEntry::new("", LogAction::Retry, "admin_all")
                        .with_data(json!({ "retried": retried })),
                )
                .await;
        }
        info!(
            subsystem = "engine",
            op = "retry_all_failed",
            retried,
            "Failed rows requeued"
        );
        self.ctx.publish_stats().await;
        Ok(retried)
    }

    /// Reset every row and enqueue them all. Returns rows reset.
    pub async fn regenerate_all(&self) -> Result<u64> {
        let start = Instant::now();
        let touched = self.ctx.stores.vectors.reset_all().await?;
        if touched == 0 {
            return Ok(0);
        }

        let ids = self
            .ctx
            .stores
            .vectors
            .list_enqueueable(i64::try_from(touched).unwrap_or(i64::MAX), MAX_RETRIES)
            .await?;
        self.ctx.queue.purge_terminal(&ids).await?;
        for id in &ids {
            self.ctx.queue.enqueue_unique(id, Duration::ZERO).await?;
        }

        let duration_ms = start.elapsed().as_millis() as i64;
        self.ctx
            .log(
                ProcessingLogEntry::new("", LogAction::Reset, "regenerate_all")
                    .with_duration_ms(duration_ms)
                    .with_data(json!({ "reset": touched, "enqueued": ids.len() })),
            )
            .await;
        warn!(
            subsystem = "engine",
            op = "regenerate_all",
            reset = touched,
            enqueued = ids.len(),
            duration_ms,
            "All vectors scheduled for regeneration"
        );
        self.ctx.publish_stats().await;
        Ok(touched)
    }

    /// Return rows stuck in `processing` to `pending` and enqueue them.
    ///
    /// `older_than` defaults to ten minutes; zero recovers every such row.
    pub async fn recover_stuck(&self, older_than: Option<Duration>) -> Result<usize> {
        let threshold = older_than.unwrap_or(STUCK_THRESHOLD);
        let before = Utc::now()
            - chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::zero());
        let ids = self.ctx.stores.vectors.recover_stuck(before).await?;

        for id in &ids {
            self.ctx.queue.enqueue_unique(id, Duration::ZERO).await?;
            self.ctx
                .log(
                    ProcessingLogEntry::new(id.as_str(), LogAction::RecoverStuck, "admin")
                        .with_data(json!({ "threshold_secs": threshold.as_secs() })),
                )
                .await;
        }
        info!(
            subsystem = "engine",
            op = "recover_stuck",
            recovered = ids.len(),
            threshold_secs = threshold.as_secs(),
            "Stuck rows recovered"
        );
        self.ctx.publish_stats().await;
        Ok(ids.len())
    }

    /// Delete a file's point and row. Returns true if a row existed.
    pub async fn remove_vector(&self, file_id: &str) -> Result<bool> {
        self.ctx.vector_store.delete(file_id).await?;
        let existed = self.ctx.stores.vectors.delete(file_id).await?;
        self.ctx
            .log(
                ProcessingLogEntry::new(file_id, LogAction::Delete, "admin")
                    .with_data(json!({ "row_existed": existed })),
            )
            .await;
        info!(
            subsystem = "engine",
            op = "remove_vector",
            file_id,
            existed,
            "Vector removed"
        );
        self.ctx.publish_stats().await;
        Ok(existed)
    }
}

async fn run_scheduled_verification(verification: &VerificationService) {
    let task = match verification
        .create_task(
            VerificationFilter::NeedsVerification,
            Some(TaskType::Scheduled),
            None,
            None,
        )
        .await
    {
        Ok(task) => task,
        Err(Error::Conflict(reason)) => {
            info!(
                subsystem = "scheduler",
                job = "scheduled_verification",
                reason = %reason,
                "Scheduled verification skipped"
            );
            return;
        }
        Err(e) => {
            warn!(
                subsystem = "scheduler",
                job = "scheduled_verification",
                error = %e,
                "Task creation failed"
            );
            return;
        }
    };
    if let Err(e) = verification.run_task(&task.task_id).await {
        warn!(
            subsystem = "scheduler",
            job = "scheduled_verification",
            task_id = %task.task_id,
            error = %e,
            "Scheduled verification failed"
        );
    }
}

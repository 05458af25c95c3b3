//! Hot reload of the `vector` config group.
//!
//! | Change | Effect |
//! |--------|--------|
//! | reload keys (switch, credentials, model, store URL) | refresh store client, debounced reconcile |
//! | `vector_concurrency` | live resize |
//! | `vector_auto_processing_enabled` | pause toggle; resume reconciles at once |
//!
//! Bursts of changes within the debounce window collapse into one sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use viss_core::defaults::{CONFIG_GROUP, RECONCILE_DEBOUNCE, RECONCILE_LIMIT};
use viss_core::{keys, ConfigChange, ConfigRegistry, EmbeddingProvider};
use viss_vector::VectorStoreSlot;

use crate::reconcile::Reconciler;
use crate::worker::WorkerPool;

/// Applies config changes to the running pipeline.
#[derive(Clone)]
pub struct ConfigWatcher {
    registry: Arc<ConfigRegistry>,
    pool: Arc<WorkerPool>,
    reconciler: Reconciler,
    provider: Arc<dyn EmbeddingProvider>,
    slot: Option<Arc<VectorStoreSlot>>,
    generation: Arc<AtomicU64>,
    sweeps: Arc<AtomicU64>,
}

impl ConfigWatcher {
    pub fn new(
        registry: Arc<ConfigRegistry>,
        pool: Arc<WorkerPool>,
        reconciler: Reconciler,
        provider: Arc<dyn EmbeddingProvider>,
        slot: Option<Arc<VectorStoreSlot>>,
    ) -> Self {
        Self {
            registry,
            pool,
            reconciler,
            provider,
            slot,
            generation: Arc::new(AtomicU64::new(0)),
            sweeps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe and apply changes until `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut changes = self.registry.subscribe();
        tokio::spawn(async move {
            info!(
                subsystem = "engine",
                component = "config_watcher",
                "Config watcher started"
            );
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = changes.recv() => match received {
                        Ok(change) => self.apply(&change).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                subsystem = "engine",
                                component = "config_watcher",
                                skipped,
                                "Config changes dropped, reconciling"
                            );
                            self.refresh_store().await;
                            self.schedule_reconcile();
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            info!(subsystem = "engine", component = "config_watcher", "Config watcher stopped");
        })
    }

    /// Apply one change.
    pub async fn apply(&self, change: &ConfigChange) {
        if change.group != CONFIG_GROUP {
            return;
        }
        debug!(
            subsystem = "engine",
            component = "config_watcher",
            key = %change.key,
            "Config change received"
        );

        if change.requires_reload() {
            self.refresh_store().await;
            self.schedule_reconcile();
        }

        let settings = self.registry.settings();
        if change.key == keys::CONCURRENCY {
            self.pool.resize(settings.concurrency);
        } else if change.key == keys::AUTO_PROCESSING_ENABLED {
            let was_paused = self.pool.set_paused(!settings.auto_processing);
            if was_paused && settings.auto_processing {
                self.reconcile_now();
            }
        } else if change.key == keys::QDRANT_TIMEOUT {
            self.refresh_store().await;
        }
    }

    async fn refresh_store(&self) {
        let Some(slot) = &self.slot else {
            return;
        };
        let settings = self.registry.settings();
        if let Err(e) = slot.refresh(&settings, self.provider.dimension()).await {
            warn!(
                subsystem = "engine",
                component = "config_watcher",
                error = %e,
                "Vector store refresh failed"
            );
        }
    }

    /// Run the reconcile pair once the debounce window passes without another trigger.
    pub fn schedule_reconcile(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RECONCILE_DEBOUNCE).await;
            if watcher.generation.load(Ordering::SeqCst) != generation {
                debug!(
                    subsystem = "engine",
                    component = "config_watcher",
                    "Reconcile superseded"
                );
                return;
            }
            watcher.run_reconcile().await;
        });
    }

    fn reconcile_now(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let watcher = self.clone();
        tokio::spawn(async move { watcher.run_reconcile().await });
    }

    async fn run_reconcile(&self) {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.reconciler.enqueue_all_pending(RECONCILE_LIMIT).await {
            warn!(
                subsystem = "reconcile",
                op = "enqueue_all_pending",
                error = %e,
                "Sweep failed"
            );
        }
        if !self.registry.settings().enabled {
            return;
        }
        if let Err(e) = self.reconciler.reconcile_missing(RECONCILE_LIMIT, false).await {
            warn!(
                subsystem = "reconcile",
                op = "reconcile_missing",
                error = %e,
                "Sweep failed"
            );
        }
    }

    /// Reconcile sweeps started by config changes.
    pub fn sweeps_run(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }
}

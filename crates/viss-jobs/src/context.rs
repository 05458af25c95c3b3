//! Shared handles passed to every pipeline task.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use viss_core::{
    ConfigRegistry, EmbeddingProvider, JobQueue, MetadataStores, ProcessingLogEntry, Result,
    StatsBus, VectorEvent, VectorMetrics, VectorStats, VectorStore,
};

/// Worker-pool flags read on every loop iteration.
///
/// Written only by the config path and admin calls; plain atomics are enough.
#[derive(Debug, Default)]
pub struct PoolState {
    concurrency: AtomicUsize,
    paused: AtomicBool,
    active: AtomicI64,
}

impl PoolState {
    pub fn new(concurrency: usize, paused: bool) -> Self {
        Self {
            concurrency: AtomicUsize::new(concurrency),
            paused: AtomicBool::new(paused),
            active: AtomicI64::new(0),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Relaxed)
    }

    pub fn set_concurrency(&self, n: usize) -> usize {
        self.concurrency.swap(n, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::SeqCst)
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn enter(&self) -> i64 {
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn leave(&self) -> i64 {
        self.active.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

/// Collaborators shared by workers, sweeps, and verification.
#[derive(Clone)]
pub struct EngineContext {
    pub stores: MetadataStores,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<ConfigRegistry>,
    pub metrics: VectorMetrics,
    pub bus: StatsBus,
    pub pool: Arc<PoolState>,
}

impl EngineContext {
    /// Append to the processing log; failures are logged, never returned.
    pub async fn log(&self, entry: ProcessingLogEntry) {
        if let Err(e) = self.stores.logs.append(&entry).await {
            warn!(
                subsystem = "engine",
                file_id = %entry.file_id,
                action = entry.action.as_str(),
                error = %e,
                "Failed to append processing log"
            );
        }
    }

    /// Point-in-time aggregates.
    pub async fn snapshot(&self) -> Result<VectorStats> {
        let counts = self.stores.vectors.status_counts().await?;
        let queue = self.queue.metrics().await?;
        self.metrics.observe_queue(&queue);
        Ok(VectorStats {
            counts,
            queue,
            active_workers: self.pool.active(),
            configured_concurrency: self.pool.concurrency() as i64,
            paused: self.pool.is_paused(),
            enabled: self.registry.settings().enabled,
            timestamp: Utc::now(),
        })
    }

    /// Publish fresh stats when anyone is subscribed.
    pub async fn publish_stats(&self) {
        if !self.bus.has_subscribers() {
            return;
        }
        match self.snapshot().await {
            Ok(stats) => self.bus.publish(VectorEvent::Stats(stats)),
            Err(e) => debug!(subsystem = "engine", error = %e, "Stats snapshot failed"),
        }
    }

    /// Model id and dimension recorded on rows this process writes.
    pub fn model_and_dimension(&self) -> (String, i32) {
        (
            self.provider.model(),
            i32::try_from(self.provider.dimension()).unwrap_or(i32::MAX),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_state_counters() {
        let state = PoolState::new(3, false);
        assert_eq!(state.concurrency(), 3);
        assert_eq!(state.set_concurrency(5), 3);
        assert_eq!(state.concurrency(), 5);

        assert!(!state.set_paused(true));
        assert!(state.is_paused());

        assert_eq!(state.enter(), 1);
        assert_eq!(state.enter(), 2);
        assert_eq!(state.leave(), 1);
        assert_eq!(state.active(), 1);
    }
}

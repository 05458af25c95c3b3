//! Shared fixtures: an engine wired to in-memory collaborators.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use viss_core::defaults::CONFIG_GROUP;
use viss_core::{
    keys, AccessLevel, ConfigRegistry, FileRecord, FileStatus, FileVector, VectorStatus,
};
use viss_db::MemoryDatabase;
use viss_inference::mock::MockEmbeddingProvider;
use viss_jobs::{EngineContext, MemoryJobQueue, VectorEngine};
use viss_vector::MemoryVectorStore;

pub struct Harness {
    pub db: MemoryDatabase,
    pub store: MemoryVectorStore,
    pub provider: MockEmbeddingProvider,
    pub queue: MemoryJobQueue,
    pub registry: Arc<ConfigRegistry>,
    pub engine: VectorEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_provider(MockEmbeddingProvider::new())
    }

    pub fn with_provider(provider: MockEmbeddingProvider) -> Self {
        let registry = Arc::new(ConfigRegistry::with_defaults());
        registry.set(CONFIG_GROUP, keys::VECTOR_ENABLED, json!(true));

        let db = MemoryDatabase::new();
        let store = MemoryVectorStore::new();
        let queue = MemoryJobQueue::new();
        let engine = VectorEngine::builder(db.stores())
            .with_registry(registry.clone())
            .with_provider(Arc::new(provider.clone()))
            .with_vector_store(Arc::new(store.clone()))
            .with_queue(Arc::new(queue.clone()))
            .with_scheduler(false)
            .build()
            .expect("engine builds");

        Self {
            db,
            store,
            provider,
            queue,
            registry,
            engine,
        }
    }

    pub fn ctx(&self) -> &EngineContext {
        self.engine.context()
    }

    /// A public, recommended file with an optional description.
    pub fn add_file(&self, id: &str, user_id: i64, description: Option<&str>) {
        self.db.insert_file(file(id, user_id, None));
        if let Some(d) = description {
            self.db.set_description(id, d);
        }
    }

    /// A near-duplicate of `original`.
    pub fn add_duplicate(&self, id: &str, user_id: i64, original: &str) {
        self.db.insert_file(file(id, user_id, Some(original)));
    }

    /// Insert a row in `status`.
    pub fn add_row(&self, id: &str, status: VectorStatus) {
        let mut row = FileVector::pending(id, "seed", "mock-embedding", 8);
        row.status = status;
        self.db.insert_vector(row);
    }

    pub fn status(&self, id: &str) -> Option<VectorStatus> {
        self.db.vector(id).map(|r| r.status)
    }
}

pub fn file(id: &str, user_id: i64, original: Option<&str>) -> FileRecord {
    FileRecord {
        id: id.to_string(),
        user_id,
        original_file_id: original.map(str::to_string),
        status: FileStatus::Normal,
        access_level: AccessLevel::Public,
        is_recommended: true,
    }
}

/// Poll `check` every 20 ms until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

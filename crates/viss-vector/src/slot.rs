//! Hot-swappable vector store handle.
//!
//! The engine holds one [`VectorStoreSlot`] for its lifetime. When the
//! vector store URL or timeout changes, [`VectorStoreSlot::refresh`] swaps the
//! underlying client; in-flight calls finish on the client they started with.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use viss_core::{
    Error, Result, ScoredPoint, StoredPoint, VectorPayload, VectorSettings, VectorStore,
};

use crate::qdrant::{QdrantClient, QdrantConfig};

#[derive(Default)]
struct SlotState {
    /// `(url, timeout)` the current client was built for.
    key: Option<(String, Duration)>,
    store: Option<Arc<dyn VectorStore>>,
}

/// A vector store that is either fixed or rebuilt from settings.
pub struct VectorStoreSlot {
    state: RwLock<SlotState>,
    fixed: bool,
}

impl VectorStoreSlot {
    /// Empty slot, populated by [`refresh`](Self::refresh).
    pub fn dynamic() -> Self {
        Self {
            state: RwLock::new(SlotState::default()),
            fixed: false,
        }
    }

    /// Slot pinned to `store`; `refresh` only initializes its collection.
    pub fn fixed(store: Arc<dyn VectorStore>) -> Self {
        Self {
            state: RwLock::new(SlotState {
                key: None,
                store: Some(store),
            }),
            fixed: true,
        }
    }

    /// The current client, or a config error when none is configured.
    pub fn current(&self) -> Result<Arc<dyn VectorStore>> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .clone()
            .ok_or_else(|| Error::Config("vector store is not configured".to_string()))
    }

    pub fn is_configured(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .is_some()
    }

    /// Bring the slot in line with `settings` and ensure the collection exists.
    ///
    /// Returns true when a new client was installed. A disabled service or an
    /// empty URL clears a dynamic slot.
    pub async fn refresh(&self, settings: &VectorSettings, dimension: usize) -> Result<bool> {
        if self.fixed {
            self.current()?.init_collection(dimension).await?;
            return Ok(false);
        }

        if settings.ensure_store_ready().is_err() {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state.store.take().is_some() {
                info!(subsystem = "vector_store", "Vector store client released");
            }
            state.key = None;
            return Ok(false);
        }

        let key = (settings.qdrant_url.clone(), settings.qdrant_timeout);
        let unchanged = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state.key.as_ref() == Some(&key) && state.store.is_some()
        };
        if unchanged {
            self.current()?.init_collection(dimension).await?;
            return Ok(false);
        }

        let client = QdrantClient::new(
            QdrantConfig::new(settings.qdrant_url.clone()).with_timeout(settings.qdrant_timeout),
        )?;
        client.init_collection(dimension).await?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.store = Some(Arc::new(client));
        state.key = Some(key);
        info!(
            subsystem = "vector_store",
            url = %settings.qdrant_url,
            dimension,
            "Vector store client installed"
        );
        Ok(true)
    }
}

#[async_trait]
impl VectorStore for VectorStoreSlot {
    async fn init_collection(&self, dimension: usize) -> Result<()> {
        self.current()?.init_collection(dimension).await
    }

    async fn upsert(&self, file_id: &str, vector: &[f32], payload: &VectorPayload) -> Result<()> {
        self.current()?.upsert(file_id, vector, payload).await
    }

    async fn fetch(&self, file_id: &str) -> Result<Option<StoredPoint>> {
        self.current()?.fetch(file_id).await
    }

    async fn exists(&self, file_id: &str) -> Result<bool> {
        self.current()?.exists(file_id).await
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        self.current()?.delete(file_id).await
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        limit: usize,
        user_id: i64,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>> {
        self.current()?
            .similarity_search(vector, limit, user_id, threshold)
            .await
    }

    async fn search_by_id(
        &self,
        file_id: &str,
        limit: usize,
        user_id: i64,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>> {
        self.current()?
            .search_by_id(file_id, limit, user_id, threshold)
            .await
    }

    async fn count(&self) -> Result<u64> {
        self.current()?.count().await
    }

    async fn scroll_ids(
        &self,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        self.current()?.scroll_ids(limit, offset).await
    }

    async fn scroll_all_ids(&self, limit: usize) -> Result<Vec<String>> {
        self.current()?.scroll_all_ids(limit).await
    }

    async fn health(&self) -> Result<()> {
        self.current()?.health().await
    }

    fn ensure_ready(&self) -> Result<()> {
        self.current().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryVectorStore;

    #[tokio::test]
    async fn test_dynamic_slot_starts_unconfigured() {
        let slot = VectorStoreSlot::dynamic();
        assert!(!slot.is_configured());
        assert!(matches!(slot.health().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_disabled_settings_keep_slot_empty() {
        let slot = VectorStoreSlot::dynamic();
        let settings = VectorSettings {
            enabled: false,
            qdrant_url: "http://localhost:6333".to_string(),
            ..VectorSettings::default()
        };
        assert!(!slot.refresh(&settings, 8).await.unwrap());
        assert!(!slot.is_configured());
    }

    #[tokio::test]
    async fn test_fixed_slot_delegates() {
        let store = MemoryVectorStore::new();
        let slot = VectorStoreSlot::fixed(Arc::new(store.clone()));
        slot.refresh(&VectorSettings::default(), 8).await.unwrap();
        assert_eq!(store.collection_dimension(), Some(8));

        let payload = VectorPayload {
            file_id: "a".to_string(),
            description: String::new(),
            model: "m".to_string(),
            user_id: 1,
        };
        slot.upsert("a", &[1.0; 8], &payload).await.unwrap();
        assert!(store.contains("a"));
        assert_eq!(slot.count().await.unwrap(), 1);
    }
}

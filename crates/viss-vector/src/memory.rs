//! In-memory vector store with cosine scoring.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use viss_core::{
    point_id_string, Error, Result, ScoredPoint, StoredPoint, VectorPayload, VectorStore,
};

/// Vector store held in process memory; clones share state.
#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    points: Arc<Mutex<BTreeMap<String, StoredPoint>>>,
    dimension: Arc<Mutex<Option<usize>>>,
    unhealthy: Arc<AtomicBool>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn points(&self) -> MutexGuard<'_, BTreeMap<String, StoredPoint>> {
        self.points.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_health(&self) -> Result<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(Error::VectorStore("vector store unavailable".to_string()));
        }
        Ok(())
    }

    /// Make every call fail with a vector-store error.
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.points().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points().is_empty()
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.points().contains_key(&point_id_string(file_id))
    }

    /// Stored point, bypassing health checks.
    pub fn get(&self, file_id: &str) -> Option<StoredPoint> {
        self.points().get(&point_id_string(file_id)).cloned()
    }

    /// Drop a point behind the metadata store's back.
    pub fn remove(&self, file_id: &str) {
        self.points().remove(&point_id_string(file_id));
    }

    /// Dimension given to the last `init_collection`.
    pub fn collection_dimension(&self) -> Option<usize> {
        *self.dimension.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn init_collection(&self, dimension: usize) -> Result<()> {
        self.check_health()?;
        let mut slot = self.dimension.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(dimension);
        }
        Ok(())
    }

    async fn upsert(&self, file_id: &str, vector: &[f32], payload: &VectorPayload) -> Result<()> {
        self.check_health()?;
        self.points().insert(
            point_id_string(file_id),
            StoredPoint {
                vector: vector.to_vec(),
                payload: payload.clone(),
            },
        );
        Ok(())
    }

    async fn fetch(&self, file_id: &str) -> Result<Option<StoredPoint>> {
        self.check_health()?;
        Ok(self.get(file_id))
    }

    async fn exists(&self, file_id: &str) -> Result<bool> {
        self.check_health()?;
        Ok(self.contains(file_id))
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        self.check_health()?;
        self.remove(file_id);
        Ok(())
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        limit: usize,
        user_id: i64,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>> {
        self.check_health()?;
        let mut hits: Vec<ScoredPoint> = self
            .points()
            .values()
            .filter(|p| user_id == 0 || p.payload.user_id == user_id)
            .map(|p| ScoredPoint {
                file_id: p.payload.file_id.clone(),
                score: cosine(vector, &p.vector),
            })
            .filter(|h| h.score >= threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        self.check_health()?;
        Ok(self.len() as u64)
    }

    async fn scroll_ids(
        &self,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        self.check_health()?;
        let points = self.points();
        let mut iter = points
            .iter()
            .filter(|(id, _)| offset.as_ref().map_or(true, |o| *id >= o));
        let ids: Vec<String> = iter
            .by_ref()
            .take(limit)
            .map(|(_, p)| p.payload.file_id.clone())
            .collect();
        let next = iter.next().map(|(id, _)| id.clone());
        Ok((ids, next))
    }

    async fn health(&self) -> Result<()> {
        self.check_health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(file_id: &str, user_id: i64) -> VectorPayload {
        VectorPayload {
            file_id: file_id.to_string(),
            description: String::new(),
            model: "m".to_string(),
            user_id,
        }
    }

    #[tokio::test]
    async fn test_search_orders_filters_and_thresholds() {
        let store = MemoryVectorStore::new();
        store.upsert("a", &[1.0, 0.0], &payload("a", 1)).await.unwrap();
        store.upsert("b", &[0.8, 0.6], &payload("b", 2)).await.unwrap();
        store.upsert("c", &[0.0, 1.0], &payload("c", 1)).await.unwrap();

        let hits = store.similarity_search(&[1.0, 0.0], 10, 0, 0.5).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.file_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let hits = store.similarity_search(&[1.0, 0.0], 10, 2, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_id, "b");
    }

    #[tokio::test]
    async fn test_scroll_pages_cover_everything() {
        let store = MemoryVectorStore::new();
        for i in 0..7 {
            let id = format!("f{i}");
            store.upsert(&id, &[1.0], &payload(&id, 1)).await.unwrap();
        }
        let (first, next) = store.scroll_ids(3, None).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(next.is_some());

        let mut all = store.scroll_all_ids(100).await.unwrap();
        all.sort();
        assert_eq!(all.len(), 7);
        assert_eq!(store.scroll_all_ids(4).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_search_by_id_uses_stored_vector() {
        let store = MemoryVectorStore::new();
        store.upsert("a", &[1.0, 0.0], &payload("a", 1)).await.unwrap();
        store.upsert("b", &[1.0, 0.1], &payload("b", 1)).await.unwrap();

        let hits = store.search_by_id("a", 10, 0, 0.9).await.unwrap();
        assert_eq!(hits[0].file_id, "a");
        assert_eq!(hits.len(), 2);
        assert!(store.search_by_id("zzz", 10, 0, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_store_fails() {
        let store = MemoryVectorStore::new();
        store.set_unhealthy(true);
        assert!(store.health().await.is_err());
        assert!(store.exists("a").await.is_err());
    }
}

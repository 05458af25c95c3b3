//! Similarity search: embed, search, hydrate, paginate.
//!
//! The vector store only knows `user_id`; visibility rules live in the
//! metadata store. Each search therefore asks the store for more hits than it
//! needs, drops what the scope hides while hydrating, and truncates to
//! `vector_max_results` keeping score order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use viss_core::defaults::{OVERSAMPLE_ADMIN, OVERSAMPLE_GALLERY, OVERSAMPLE_USER};
use viss_core::{
    ConfigRegistry, EmbeddingProvider, Error, FileRepository, Result, ScoredPoint, SearchScope,
    VectorSettings, VectorStore,
};
use viss_jobs::VectorEngine;

use crate::request::{
    paginate, SearchHit, SearchMeta, SearchRequest, SearchResponse, SimilarRequest,
};

/// Search operations exposed to callers.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Textual search thresholded by `vector_search_threshold`.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;

    /// Files similar to an indexed file, thresholded by `vector_similarity_threshold`.
    async fn similar(&self, request: &SimilarRequest) -> Result<SearchResponse>;
}

/// Vector-store hits requested per result slot.
pub fn oversample_factor(scope: &SearchScope) -> usize {
    match scope {
        SearchScope::Public => OVERSAMPLE_GALLERY,
        SearchScope::User(_) => OVERSAMPLE_USER,
        SearchScope::Admin => OVERSAMPLE_ADMIN,
    }
}

/// Search engine sharing the indexing pipeline's provider and vector store.
#[derive(Clone)]
pub struct SearchEngine {
    files: Arc<dyn FileRepository>,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    registry: Arc<ConfigRegistry>,
}

impl SearchEngine {
    pub fn new(
        files: Arc<dyn FileRepository>,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        registry: Arc<ConfigRegistry>,
    ) -> Self {
        Self {
            files,
            provider,
            store,
            registry,
        }
    }

    /// Search over the engine's collaborators, following its hot reloads.
    pub fn from_engine(engine: &VectorEngine) -> Self {
        let ctx = engine.context();
        Self::new(
            ctx.stores.files.clone(),
            ctx.provider.clone(),
            ctx.vector_store.clone(),
            ctx.registry.clone(),
        )
    }

    /// Settings snapshot, or a config error when search cannot run.
    fn ready_settings(&self) -> Result<VectorSettings> {
        let settings = self.registry.settings();
        if !settings.enabled {
            return Err(Error::Config("vector search is disabled".to_string()));
        }
        self.store.ensure_ready()?;
        Ok(settings)
    }

    /// Keep hits visible in `scope`, in score order, up to `limit`.
    async fn hydrate(
        &self,
        hits: Vec<ScoredPoint>,
        scope: &SearchScope,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = hits.iter().map(|h| h.file_id.clone()).collect();
        let mut visible: HashMap<String, _> = self
            .files
            .hydrate(&ids, scope)
            .await?
            .into_iter()
            .map(|f| (f.id.clone(), f))
            .collect();

        let mut out = Vec::with_capacity(limit.min(hits.len()));
        for hit in hits {
            if out.len() >= limit {
                break;
            }
            if let Some(file) = visible.remove(&hit.file_id) {
                out.push(SearchHit {
                    file,
                    score: hit.score,
                });
            }
        }
        Ok(out)
    }

    fn respond(
        hits: Vec<SearchHit>,
        page: usize,
        page_size: usize,
        threshold: f64,
        started: Instant,
    ) -> SearchResponse {
        let (items, pagination) = paginate(hits, page, page_size);
        SearchResponse {
            items,
            pagination,
            meta: SearchMeta {
                threshold,
                process_time_ms: started.elapsed().as_millis() as u64,
                used_cache: false,
            },
        }
    }
}

/// Hide backend detail from callers; config and input errors pass through.
fn surface(op: &'static str, e: Error) -> Error {
    match e {
        Error::Config(_) | Error::InvalidInput(_) | Error::NotFound(_) => e,
        other => {
            error!(
                subsystem = "search",
                op,
                error = %other,
                error_code = other.code(),
                "Search failed"
            );
            Error::Search("search failed".to_string())
        }
    }
}

#[async_trait]
impl SemanticSearch for SearchEngine {
    #[instrument(skip(self, request), fields(
        subsystem = "search",
        component = "search_engine",
        op = "search",
        scope = ?request.scope,
    ))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query is empty".to_string()));
        }
        let settings = self.ready_settings()?;
        self.provider.ensure_ready()?;

        let limit = settings.max_results;
        let fetch = limit.saturating_mul(oversample_factor(&request.scope));
        let threshold = settings.search_threshold;

        let vector = self
            .provider
            .embed(query)
            .await
            .map_err(|e| surface("search", e))?;
        let raw = self
            .store
            .similarity_search(
                &vector,
                fetch,
                request.scope.vector_filter_user(),
                threshold as f32,
            )
            .await
            .map_err(|e| surface("search", e))?;
        let raw_hits = raw.len();
        let hits = self
            .hydrate(raw, &request.scope, limit)
            .await
            .map_err(|e| surface("search", e))?;

        info!(
            raw_hits,
            result_count = hits.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Search completed"
        );
        Ok(Self::respond(
            hits,
            request.page,
            request.page_size,
            threshold,
            started,
        ))
    }

    #[instrument(skip(self, request), fields(
        subsystem = "search",
        component = "search_engine",
        op = "similar",
        file_id = %request.file_id,
        scope = ?request.scope,
    ))]
    async fn similar(&self, request: &SimilarRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        if request.file_id.is_empty() {
            return Err(Error::InvalidInput("file id is empty".to_string()));
        }
        let settings = self.ready_settings()?;

        let limit = settings.max_results;
        // One extra slot for the anchor, which always matches itself.
        let fetch = limit
            .saturating_add(1)
            .saturating_mul(oversample_factor(&request.scope));
        let threshold = settings.similarity_threshold;

        let mut raw = self
            .store
            .search_by_id(
                &request.file_id,
                fetch,
                request.scope.vector_filter_user(),
                threshold as f32,
            )
            .await
            .map_err(|e| surface("similar", e))?;
        raw.retain(|h| h.file_id != request.file_id);
        debug!(raw_hits = raw.len(), "Anchor dropped");

        let hits = self
            .hydrate(raw, &request.scope, limit)
            .await
            .map_err(|e| surface("similar", e))?;

        info!(
            result_count = hits.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Similar search completed"
        );
        Ok(Self::respond(
            hits,
            request.page,
            request.page_size,
            threshold,
            started,
        ))
    }
}

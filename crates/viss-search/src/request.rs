//! Search requests and responses.

use serde::{Deserialize, Serialize};

use viss_core::defaults::PAGE_SIZE;
use viss_core::{FileRecord, Result, SearchScope};

use crate::engine::SemanticSearch;

/// A hydrated search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file: FileRecord,
    /// Cosine similarity reported by the vector store.
    pub score: f32,
}

/// Page position of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    /// Hits across all pages.
    pub total: usize,
    pub total_pages: usize,
}

/// Response metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMeta {
    /// Score threshold applied by the vector store.
    pub threshold: f64,
    pub process_time_ms: u64,
    /// Always false; responses are not cached.
    pub used_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchHit>,
    pub pagination: Pagination,
    pub meta: SearchMeta,
}

/// Slice `hits` to one page.
///
/// `page` is 1-based; zero is treated as the first page. Pages past the end
/// are empty but still report the totals.
pub fn paginate(hits: Vec<SearchHit>, page: usize, page_size: usize) -> (Vec<SearchHit>, Pagination) {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total = hits.len();
    let total_pages = total.div_ceil(page_size);

    let items = hits
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    (
        items,
        Pagination {
            page,
            page_size,
            total,
            total_pages,
        },
    )
}

/// Builder for a textual search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub scope: SearchScope,
    pub page: usize,
    pub page_size: usize,
}

impl SearchRequest {
    /// Public-scope search for `query`, first page.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            scope: SearchScope::Public,
            page: 1,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Restrict to files owned by `user_id`.
    pub fn for_user(self, user_id: i64) -> Self {
        self.with_scope(SearchScope::User(user_id))
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub async fn execute<S: SemanticSearch + ?Sized>(self, engine: &S) -> Result<SearchResponse> {
        engine.search(&self).await
    }
}

/// Builder for a similar-by-id search.
#[derive(Debug, Clone)]
pub struct SimilarRequest {
    /// Anchor file whose stored vector is reused; never part of the results.
    pub file_id: String,
    pub scope: SearchScope,
    pub page: usize,
    pub page_size: usize,
}

impl SimilarRequest {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            scope: SearchScope::Public,
            page: 1,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn for_user(self, user_id: i64) -> Self {
        self.with_scope(SearchScope::User(user_id))
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub async fn execute<S: SemanticSearch + ?Sized>(self, engine: &S) -> Result<SearchResponse> {
        engine.similar(&self).await
    }
}

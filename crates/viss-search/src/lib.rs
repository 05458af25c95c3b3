//! # viss-search
//!
//! Semantic similarity search over indexed file descriptions.
//!
//! This crate provides:
//! - Textual search: embed a query and search the vector store
//! - Similar-by-id search reusing a file's stored vector
//! - Scope enforcement (public gallery, user, admin) by hydrating hits
//!   against the metadata store, with oversampling to keep pages full
//! - Pagination and response metadata
//!
//! ## Example
//!
//! ```ignore
//! use viss_core::SearchScope;
//! use viss_search::{SearchEngine, SearchRequest};
//!
//! let search = SearchEngine::from_engine(&engine);
//!
//! let response = SearchRequest::new("a red bicycle")
//!     .with_scope(SearchScope::Public)
//!     .with_page(1, 20)
//!     .execute(&search)
//!     .await?;
//!
//! for hit in response.items {
//!     println!("{} {:.3}", hit.file.id, hit.score);
//! }
//! ```

pub mod engine;
pub mod request;

pub use engine::{SemanticSearch, SearchEngine};
pub use request::{
    paginate, Pagination, SearchHit, SearchMeta, SearchRequest, SearchResponse, SimilarRequest,
};

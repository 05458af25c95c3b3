//! # viss-vector
//!
//! Vector store clients for the vector indexing subsystem.
//!
//! This crate provides:
//! - A Qdrant REST client implementing [`VectorStore`](viss_core::VectorStore)
//! - A hot-swappable slot that rebuilds the client when settings change
//! - An in-memory store with cosine scoring for tests

pub mod memory;
pub mod qdrant;
pub mod slot;
pub mod types;

pub use memory::MemoryVectorStore;
pub use qdrant::{QdrantClient, QdrantConfig};
pub use slot::VectorStoreSlot;

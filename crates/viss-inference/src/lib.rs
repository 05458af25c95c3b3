//! # viss-inference
//!
//! Embedding provider for the vector indexing subsystem.
//!
//! This crate provides:
//! - Deterministic text preprocessing shared by indexing and querying
//! - The model-to-dimension table
//! - A dynamic OpenAI-compatible client that follows config changes live
//! - A mock provider for tests (feature `mock`)

pub mod openai;
pub mod preprocess;

#[cfg(feature = "mock")]
pub mod mock;

pub use openai::OpenAIEmbeddingClient;
pub use preprocess::preprocess;

use viss_core::defaults::{EMBED_DIMENSION, EMBED_DIMENSION_LARGE};

/// Vector dimension produced by `model`; unknown models get the small-model size.
pub fn dimension_for_model(model: &str) -> usize {
    match model.trim() {
        "text-embedding-3-large" => EMBED_DIMENSION_LARGE,
        _ => EMBED_DIMENSION,
    }
}

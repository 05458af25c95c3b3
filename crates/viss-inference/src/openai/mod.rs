//! OpenAI-compatible embedding provider.
//!
//! Works with any endpoint speaking the `/v1/embeddings` protocol. Settings
//! are read from the [`ConfigRegistry`](viss_core::ConfigRegistry) per call.

mod client;
pub mod error;
pub mod types;

pub use client::OpenAIEmbeddingClient;
pub use error::OpenAIErrorCode;

//! # viss-core
//!
//! Core types, traits, and abstractions for the vector indexing and search
//! subsystem.
//!
//! This crate provides the domain model shared by every other crate, the
//! trait seams for the metadata store, embedding provider, vector store, and
//! job queue, and the configuration registry that drives hot reload.

pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod point_id;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{keys, normalize_base_url, ConfigChange, ConfigRegistry, VectorSettings};
pub use error::{Error, Result};
pub use events::{StatsBus, VectorEvent, VectorStats};
pub use metrics::VectorMetrics;
pub use models::*;
pub use point_id::{point_id, point_id_string};
pub use traits::*;

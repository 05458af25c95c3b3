//! # viss-jobs
//!
//! Background pipeline for the vector indexing subsystem.
//!
//! This crate provides:
//! - Queue backends (Redis, in-memory) beside the database queue in `viss-db`
//! - A resizable worker pool turning queued file ids into stored vectors
//! - Duplicate propagation, reconciliation sweeps, and verification tasks
//! - Hot reload of the `vector` config group and a periodic scheduler
//! - [`VectorEngine`], the process-wide registry exposing admin operations
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use viss_db::Database;
//! use viss_jobs::VectorEngine;
//!
//! let db = Database::connect("postgres://...").await?;
//! let engine = VectorEngine::builder(db.stores())
//!     .with_queue(Arc::new(db.job_queue()))
//!     .build()?;
//!
//! engine.init().await?;
//! engine.start();
//!
//! let mut events = engine.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//!
//! engine.shutdown().await;
//! ```

pub mod context;
pub mod engine;
pub mod propagate;
pub mod queue;
pub mod reaper;
pub mod reconcile;
pub mod scheduler;
pub mod verification;
pub mod watcher;
pub mod worker;

pub use context::{EngineContext, PoolState};
pub use engine::{ComponentHealth, HealthReport, VectorEngine, VectorEngineBuilder};
pub use propagate::propagate_to_duplicates;
pub use queue::{MemoryJobQueue, QueueBackend, RedisJobQueue};
pub use reaper::spawn_reaper;
pub use reconcile::{OrphanResult, ReconcileResult, Reconciler};
pub use scheduler::{spawn_scheduler, Schedule, ScheduledJob};
pub use verification::VerificationService;
pub use watcher::ConfigWatcher;
pub use worker::{process_lease, run_once, JobOutcome, WorkerPool};

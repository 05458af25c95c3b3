//! # viss-db
//!
//! PostgreSQL layer for the vector indexing subsystem.
//!
//! This crate provides:
//! - Connection pool management
//! - Repositories for `file`, `file_ai_info`, `file_vector`,
//!   `vector_verification_task`, `vector_processing_log`, and `system_config`
//! - The database-backed job queue over `vector_job`
//! - An in-memory store with the same semantics for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use viss_db::Database;
//!
//! let db = Database::connect("postgres://localhost/viss").await?;
//! db.migrate().await?;
//! let stores = db.stores();
//! let queue = db.job_queue();
//! ```

pub mod file_vectors;
pub mod files;
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod processing_log;
pub mod system_config;
pub mod verification;

use std::sync::Arc;

pub use file_vectors::PgFileVectorRepository;
pub use files::PgFileRepository;
pub use jobs::PgJobQueue;
pub use memory::MemoryDatabase;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use processing_log::PgProcessingLogRepository;
pub use system_config::PgConfigStore;
pub use verification::PgVerificationTaskRepository;

use viss_core::{Error, MetadataStores, Result};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Hosting platform files (read-only).
    pub files: PgFileRepository,
    /// Per-file embedding state.
    pub vectors: PgFileVectorRepository,
    /// Verification task rows.
    pub tasks: PgVerificationTaskRepository,
    /// Processing audit log.
    pub logs: PgProcessingLogRepository,
    /// Persisted config values.
    pub config: PgConfigStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            files: PgFileRepository::new(pool.clone()),
            vectors: PgFileVectorRepository::new(pool.clone()),
            tasks: PgVerificationTaskRepository::new(pool.clone()),
            logs: PgProcessingLogRepository::new(pool.clone()),
            config: PgConfigStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Round-trip a trivial query and log pool occupancy.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        log_pool_metrics(&self.pool);
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// The repositories as trait objects.
    pub fn stores(&self) -> MetadataStores {
        MetadataStores {
            files: Arc::new(self.files.clone()),
            vectors: Arc::new(self.vectors.clone()),
            tasks: Arc::new(self.tasks.clone()),
            logs: Arc::new(self.logs.clone()),
            config: Arc::new(self.config.clone()),
        }
    }

    /// A job queue over `vector_job` sharing this pool.
    pub fn job_queue(&self) -> PgJobQueue {
        PgJobQueue::new(self.pool.clone())
    }
}

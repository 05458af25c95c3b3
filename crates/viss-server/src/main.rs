//! Vector indexing process.
//!
//! Connects to PostgreSQL, selects a queue backend, and runs the
//! [`VectorEngine`] until SIGINT or SIGTERM.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use viss_core::{ConfigRegistry, JobQueue};
use viss_db::{Database, PoolConfig};
use viss_jobs::{MemoryJobQueue, QueueBackend, RedisJobQueue, VectorEngine};

/// Bootstrap settings read once at startup.
#[derive(Debug, Clone, PartialEq)]
struct ServerConfig {
    database_url: String,
    queue_backend: QueueBackend,
    redis_url: Option<String>,
    /// When false this process never fetches jobs; another node does.
    worker_enabled: bool,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/viss".to_string());
        let queue_backend = match lookup("VECTOR_QUEUE_BACKEND") {
            Some(v) if !v.trim().is_empty() => QueueBackend::from_str(&v)?,
            _ => QueueBackend::Database,
        };
        let redis_url = lookup("REDIS_URL").filter(|v| !v.trim().is_empty());
        if queue_backend == QueueBackend::Redis && redis_url.is_none() {
            anyhow::bail!("VECTOR_QUEUE_BACKEND=redis requires REDIS_URL");
        }
        let worker_enabled = lookup("VECTOR_WORKER_ENABLED")
            .map(|v| !matches!(v.trim(), "false" | "0" | "no" | "off"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            queue_backend,
            redis_url,
            worker_enabled,
        })
    }
}

/// Install the global subscriber.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily rotation)
///   RUST_LOG    - standard env filter (default: "info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("viss-server.log");
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

async fn build_queue(config: &ServerConfig, db: &Database) -> anyhow::Result<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = match config.queue_backend {
        QueueBackend::Database => Arc::new(db.job_queue()),
        QueueBackend::Redis => {
            let url = config.redis_url.as_deref().unwrap_or_default();
            Arc::new(RedisJobQueue::connect(url).await?)
        }
        QueueBackend::Memory => {
            warn!(
                subsystem = "queue",
                backend = "memory",
                "In-memory queue selected; jobs are lost on restart and not shared across processes"
            );
            Arc::new(MemoryJobQueue::new())
        }
    };
    info!(subsystem = "queue", backend = queue.name(), "Queue backend ready");
    Ok(queue)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let config = ServerConfig::from_env()?;
    info!(
        queue_backend = config.queue_backend.as_str(),
        worker_enabled = config.worker_enabled,
        "Starting vector indexing service"
    );

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");
    db.ping().await?;

    let registry = Arc::new(ConfigRegistry::with_defaults());
    registry.load_env();

    let queue = build_queue(&config, &db).await?;
    let engine = VectorEngine::builder(db.stores())
        .with_registry(registry)
        .with_queue(queue)
        .with_scheduler(config.worker_enabled)
        .build()?;

    engine.init().await?;
    if config.worker_enabled {
        engine.start();
    } else {
        info!("VECTOR_WORKER_ENABLED is false; workers and scheduler not started");
    }

    let health = engine.health().await;
    info!(
        enabled = health.enabled,
        provider_ok = health.provider.ok,
        vector_store_ok = health.vector_store.ok,
        queue_ok = health.queue.ok,
        "Vector engine ready"
    );

    shutdown_signal().await;

    info!("Shutting down");
    engine.shutdown().await;
    db.pool().close().await;
    info!("Shutdown complete");
    Ok(())
}

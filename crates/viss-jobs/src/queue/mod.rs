//! Job queue backends.
//!
//! | Backend | Type | Use |
//! |---------|------|-----|
//! | `redis` | [`RedisJobQueue`] | Shared across processes, atomic Lua scripts |
//! | `database` | `viss_db::PgJobQueue` | `vector_job` table with `SKIP LOCKED` |
//! | `memory` | [`MemoryJobQueue`] | Single process, tests and local runs |
//!
//! Every backend honors the same contract: unique enqueue per file id,
//! leased fetch, token-fenced ack/nack, delayed redelivery, a dead-letter
//! set, and a reaper that requeues expired leases.

pub mod memory;
pub mod redis;

use std::str::FromStr;

use viss_core::Error;

pub use self::memory::MemoryJobQueue;
pub use self::redis::RedisJobQueue;

/// Which queue backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Redis,
    Database,
    Memory,
}

impl QueueBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueBackend::Redis => "redis",
            QueueBackend::Database => "database",
            QueueBackend::Memory => "memory",
        }
    }
}

impl FromStr for QueueBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "database" | "db" | "postgres" => Ok(QueueBackend::Database),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(Error::InvalidInput(format!(
                "unknown queue backend: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("redis".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert_eq!(
            " Postgres ".parse::<QueueBackend>().unwrap(),
            QueueBackend::Database
        );
        assert_eq!(
            "memory".parse::<QueueBackend>().unwrap(),
            QueueBackend::Memory
        );
        assert!("kafka".parse::<QueueBackend>().is_err());
    }
}

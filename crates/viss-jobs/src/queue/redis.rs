//! Redis-backed job queue shared by every process.
//!
//! ## Keys
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `{prefix}:queue` | ZSET | file id scored by visible-at (ms) |
//! | `{prefix}:inflight` | ZSET | file id scored by lease-until (ms) |
//! | `{prefix}:job:{file_id}` | HASH | `attempts`, `token`, `enqueued_at`, `last_error` |
//! | `{prefix}:dlq` | HASH | file id to dead-letter reason |
//!
//! Every state transition runs as one Lua script, so fetch+lease, ack, nack,
//! and reaping are atomic with respect to each other.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info};
use uuid::Uuid;

use viss_core::defaults::QUEUE_KEY_PREFIX;
use viss_core::{Error, JobQueue, Lease, QueueMetrics, Result};

static ENQUEUE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('ZSCORE', KEYS[1], ARGV[1]) or redis.call('ZSCORE', KEYS[2], ARGV[1]) then
            return 0
        end
        redis.call('HDEL', KEYS[4], ARGV[1])
        redis.call('DEL', KEYS[3])
        redis.call('HSET', KEYS[3], 'attempts', 0, 'enqueued_at', ARGV[3])
        redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
        return 1
        ",
    )
});

static FETCH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
        if #ids == 0 then
            return false
        end
        local id = ids[1]
        local job = ARGV[4] .. ':job:' .. id
        redis.call('ZREM', KEYS[1], id)
        redis.call('ZADD', KEYS[2], ARGV[2], id)
        redis.call('HSET', job, 'token', ARGV[3])
        local attempts = redis.call('HGET', job, 'attempts') or '0'
        return {id, attempts}
        ",
    )
});

static ACK: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('HGET', KEYS[2], 'token') ~= ARGV[2] then
            return 0
        end
        redis.call('ZREM', KEYS[1], ARGV[1])
        redis.call('DEL', KEYS[2])
        return 1
        ",
    )
});

static NACK: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('HGET', KEYS[3], 'token') ~= ARGV[2] then
            return 0
        end
        redis.call('ZREM', KEYS[1], ARGV[1])
        if ARGV[4] == '1' then
            redis.call('HSET', KEYS[4], ARGV[1], ARGV[5])
            redis.call('DEL', KEYS[3])
        else
            redis.call('HINCRBY', KEYS[3], 'attempts', 1)
            redis.call('HDEL', KEYS[3], 'token')
            redis.call('HSET', KEYS[3], 'last_error', ARGV[5])
            redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
        end
        return 1
        ",
    )
});

static REAP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
        for _, id in ipairs(ids) do
            local job = ARGV[2] .. ':job:' .. id
            redis.call('ZREM', KEYS[1], id)
            redis.call('HINCRBY', job, 'attempts', 1)
            redis.call('HDEL', job, 'token')
            redis.call('ZADD', KEYS[2], ARGV[1], id)
        end
        return #ids
        ",
    )
});

/// Queue over a shared Redis instance.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisJobQueue {
    /// Connect with the default `vector` key prefix.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_prefix(url, QUEUE_KEY_PREFIX).await
    }

    /// Connect with a custom key prefix (isolates test runs).
    pub async fn connect_with_prefix(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("Invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        info!(
            subsystem = "queue",
            backend = "redis",
            prefix,
            "Redis job queue connected"
        );
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    fn inflight_key(&self) -> String {
        format!("{}:inflight", self.prefix)
    }

    fn job_key(&self, file_id: &str) -> String {
        format!("{}:job:{}", self.prefix, file_id)
    }

    fn dlq_key(&self) -> String {
        format!("{}:dlq", self.prefix)
    }
}

fn millis_after(now: DateTime<Utc>, d: Duration) -> i64 {
    now.timestamp_millis()
        .saturating_add(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue_unique(&self, file_id: &str, delay: Duration) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.conn.clone();
        let inserted: i64 = ENQUEUE
            .key(self.queue_key())
            .key(self.inflight_key())
            .key(self.job_key(file_id))
            .key(self.dlq_key())
            .arg(file_id)
            .arg(millis_after(now, delay))
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if inserted == 0 {
            debug!(
                subsystem = "queue",
                backend = "redis",
                file_id,
                "Job already live, enqueue skipped"
            );
        }
        Ok(())
    }

    async fn fetch(&self, lease: Duration) -> Result<Option<Lease>> {
        let now = Utc::now();
        let lease_ms = millis_after(now, lease);
        let token = Uuid::new_v4();
        let mut conn = self.conn.clone();

        let claimed: Option<(String, i32)> = FETCH
            .key(self.queue_key())
            .key(self.inflight_key())
            .arg(now.timestamp_millis())
            .arg(lease_ms)
            .arg(token.to_string())
            .arg(&self.prefix)
            .invoke_async(&mut conn)
            .await?;

        Ok(claimed.map(|(file_id, attempts)| Lease {
            file_id,
            attempts,
            token,
            lease_until: DateTime::from_timestamp_millis(lease_ms).unwrap_or(now),
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = ACK
            .key(self.inflight_key())
            .key(self.job_key(&lease.file_id))
            .arg(&lease.file_id)
            .arg(lease.token.to_string())
            .invoke_async(&mut conn)
            .await?;
        if removed == 0 {
            debug!(
                subsystem = "queue",
                backend = "redis",
                file_id = %lease.file_id,
                "Ack ignored for stale lease"
            );
        }
        Ok(())
    }

    async fn nack(
        &self,
        lease: &Lease,
        delay: Duration,
        to_dlq: bool,
        reason: &str,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let applied: i64 = NACK
            .key(self.inflight_key())
            .key(self.queue_key())
            .key(self.job_key(&lease.file_id))
            .key(self.dlq_key())
            .arg(&lease.file_id)
            .arg(lease.token.to_string())
            .arg(millis_after(Utc::now(), delay))
            .arg(if to_dlq { "1" } else { "0" })
            .arg(reason)
            .invoke_async(&mut conn)
            .await?;
        if applied == 0 {
            debug!(
                subsystem = "queue",
                backend = "redis",
                file_id = %lease.file_id,
                "Nack ignored for stale lease"
            );
        }
        Ok(())
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let (queued, delayed, in_flight, dlq): (i64, i64, i64, i64) = redis::pipe()
            .zcount(self.queue_key(), "-inf", now)
            .zcount(self.queue_key(), format!("({now}"), "+inf")
            .zcard(self.inflight_key())
            .hlen(self.dlq_key())
            .query_async(&mut conn)
            .await?;
        Ok(QueueMetrics {
            queued,
            in_flight,
            delayed,
            dlq,
        })
    }

    async fn reap_expired(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let reaped: u64 = REAP
            .key(self.inflight_key())
            .key(self.queue_key())
            .arg(Utc::now().timestamp_millis())
            .arg(&self.prefix)
            .invoke_async(&mut conn)
            .await?;
        if reaped > 0 {
            info!(
                subsystem = "queue",
                backend = "redis",
                component = "reaper",
                reaped,
                "Expired leases requeued"
            );
        }
        Ok(reaped)
    }

    async fn live_jobs(&self, file_ids: &[String]) -> Result<HashSet<String>> {
        if file_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut pipe = redis::pipe();
        for id in file_ids {
            pipe.zscore(self.queue_key(), id);
            pipe.zscore(self.inflight_key(), id);
        }
        let mut conn = self.conn.clone();
        let scores: Vec<Option<f64>> = pipe.query_async(&mut conn).await?;
        Ok(file_ids
            .iter()
            .zip(scores.chunks(2))
            .filter(|(_, pair)| pair.iter().any(Option::is_some))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

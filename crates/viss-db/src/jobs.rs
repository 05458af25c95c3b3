//! Database-backed job queue over `vector_job`.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so any number of workers, in any
//! number of processes, can poll the same table. A partial unique index on
//! `file_id` for live states keeps at most one queued-or-processing job per
//! file. Lease tokens fence late acks from a handler whose lease was reaped.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use viss_core::{Error, JobQueue, Lease, QueueMetrics, Result};

/// PostgreSQL implementation of JobQueue.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: Pool<Postgres>,
}

impl PgJobQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Longest delay or lease accepted, in days; larger values are clamped.
const MAX_DELAY_DAYS: i64 = 3650;

fn chrono_duration(d: Duration) -> chrono::Duration {
    let max = chrono::Duration::days(MAX_DELAY_DAYS);
    chrono::Duration::from_std(d).unwrap_or(max).min(max)
}

#[async_trait]
impl JobQueue for PgJobQueue {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn enqueue_unique(&self, file_id: &str, delay: Duration) -> Result<()> {
        let now = Utc::now();
        let visible_at = now + chrono_duration(delay);

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // A fresh enqueue supersedes any terminal record for the file.
        sqlx::query("DELETE FROM vector_job WHERE file_id = $1 AND status IN ('done', 'failed')")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let result = sqlx::query(
            "INSERT INTO vector_job (file_id, status, visible_at, created_at, updated_at)
             VALUES ($1, 'queued', $2, $3, $3)
             ON CONFLICT (file_id) WHERE status IN ('queued', 'processing') DO NOTHING",
        )
        .bind(file_id)
        .bind(visible_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            debug!(
                subsystem = "queue",
                backend = "database",
                file_id,
                "Job already live, enqueue skipped"
            );
        }
        Ok(())
    }

    async fn fetch(&self, lease: Duration) -> Result<Option<Lease>> {
        let now = Utc::now();
        let lease_until = now + chrono_duration(lease);
        let token = Uuid::new_v4();

        let row = sqlx::query(
            "UPDATE vector_job
             SET status = 'processing', lease_until = $2, lease_token = $3, updated_at = $1
             WHERE id = (
                 SELECT id FROM vector_job
                 WHERE status = 'queued' AND visible_at <= $1
                 ORDER BY visible_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING file_id, attempts",
        )
        .bind(now)
        .bind(lease_until)
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| Lease {
            file_id: r.get("file_id"),
            attempts: r.get("attempts"),
            token,
            lease_until,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        let result = sqlx::query(
            "UPDATE vector_job
             SET status = 'done', lease_until = NULL, lease_token = NULL, updated_at = $3
             WHERE file_id = $1 AND lease_token = $2 AND status = 'processing'",
        )
        .bind(&lease.file_id)
        .bind(lease.token)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            debug!(
                subsystem = "queue",
                backend = "database",
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
        let now = Utc::now();
        let result = if to_dlq {
            sqlx::query(
                "UPDATE vector_job
                 SET status = 'failed', attempts = attempts + 1, last_error = $3,
                     lease_until = NULL, lease_token = NULL, updated_at = $4
                 WHERE file_id = $1 AND lease_token = $2 AND status = 'processing'",
            )
            .bind(&lease.file_id)
            .bind(lease.token)
            .bind(reason)
            .bind(now)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                "UPDATE vector_job
                 SET status = 'queued', attempts = attempts + 1, last_error = $3,
                     visible_at = $5, lease_until = NULL, lease_token = NULL, updated_at = $4
                 WHERE file_id = $1 AND lease_token = $2 AND status = 'processing'",
            )
            .bind(&lease.file_id)
            .bind(lease.token)
            .bind(reason)
            .bind(now)
            .bind(now + chrono_duration(delay))
            .execute(&self.pool)
            .await
        }
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            debug!(
                subsystem = "queue",
                backend = "database",
                file_id = %lease.file_id,
                "Nack ignored for stale lease"
            );
        }
        Ok(())
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let row = sqlx::query(
            "SELECT
                 COUNT(*) FILTER (WHERE status = 'queued' AND visible_at <= $1) AS queued,
                 COUNT(*) FILTER (WHERE status = 'processing') AS in_flight,
                 COUNT(*) FILTER (WHERE status = 'queued' AND visible_at > $1) AS delayed,
                 COUNT(*) FILTER (WHERE status = 'failed') AS dlq
             FROM vector_job",
        )
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueMetrics {
            queued: row.get("queued"),
            in_flight: row.get("in_flight"),
            delayed: row.get("delayed"),
            dlq: row.get("dlq"),
        })
    }

    async fn reap_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE vector_job
             SET status = 'queued', attempts = attempts + 1, visible_at = $1,
                 lease_until = NULL, lease_token = NULL, updated_at = $1
             WHERE status = 'processing' AND lease_until < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            info!(
                subsystem = "queue",
                backend = "database",
                op = "reap",
                reaped,
                "Requeued jobs with expired leases"
            );
        }
        Ok(reaped)
    }

    async fn live_jobs(&self, file_ids: &[String]) -> Result<HashSet<String>> {
        if file_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            "SELECT file_id FROM vector_job
             WHERE file_id = ANY($1) AND status IN ('queued', 'processing')",
        )
        .bind(file_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|r| r.get("file_id")).collect())
    }

    async fn purge_terminal(&self, file_ids: &[String]) -> Result<u64> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM vector_job WHERE file_id = ANY($1) AND status IN ('done', 'failed')",
        )
        .bind(file_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

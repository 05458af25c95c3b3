//! Append-only `vector_processing_log`.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use viss_core::{Error, ProcessingLogEntry, ProcessingLogRepository, Result};

/// PostgreSQL implementation of ProcessingLogRepository.
#[derive(Clone)]
pub struct PgProcessingLogRepository {
    pool: Pool<Postgres>,
}

impl PgProcessingLogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessingLogRepository for PgProcessingLogRepository {
    async fn append(&self, entry: &ProcessingLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO vector_processing_log
                 (file_id, action, type, data, model, duration, error_code, task_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&entry.file_id)
        .bind(entry.action.as_str())
        .bind(&entry.log_type)
        .bind(&entry.data)
        .bind(&entry.model)
        .bind(entry.duration_ms)
        .bind(&entry.error_code)
        .bind(&entry.task_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_file(&self, file_id: &str, limit: i64) -> Result<Vec<ProcessingLogEntry>> {
        let rows = sqlx::query(
            "SELECT file_id, action, type, data, model, duration, error_code, task_id
             FROM vector_processing_log
             WHERE file_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(file_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|r| -> Result<ProcessingLogEntry> {
                let action: String = r.get("action");
                Ok(ProcessingLogEntry {
                    file_id: r.get("file_id"),
                    action: action.parse()?,
                    log_type: r.get("type"),
                    data: r.get("data"),
                    model: r.get("model"),
                    duration_ms: r.get("duration"),
                    error_code: r.get("error_code"),
                    task_id: r.get("task_id"),
                })
            })
            .collect()
    }
}

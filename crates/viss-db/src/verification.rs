//! Repository for `vector_verification_task`.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use viss_core::{
    Error, Result, TaskProgress, TaskStatus, VerificationTask, VerificationTaskRepository,
};

const TASK_COLUMNS: &str = "task_id, task_type, status, creator_id, filter_conditions, \
     total_count, processed_count, verified_count, missing_count, error_count, batch_size, \
     error_message, started_at, completed_at, created_at";

/// PostgreSQL implementation of VerificationTaskRepository.
#[derive(Clone)]
pub struct PgVerificationTaskRepository {
    pool: Pool<Postgres>,
}

impl PgVerificationTaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn parse_task_row(row: &PgRow) -> Result<VerificationTask> {
    let task_type: String = row.get("task_type");
    let status: String = row.get("status");
    Ok(VerificationTask {
        task_id: row.get("task_id"),
        task_type: task_type.parse()?,
        status: status.parse()?,
        creator_id: row.get("creator_id"),
        filter_conditions: row.get("filter_conditions"),
        total_count: row.get("total_count"),
        processed_count: row.get("processed_count"),
        verified_count: row.get("verified_count"),
        missing_count: row.get("missing_count"),
        error_count: row.get("error_count"),
        batch_size: row.get("batch_size"),
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl VerificationTaskRepository for PgVerificationTaskRepository {
    async fn create(&self, task: &VerificationTask) -> Result<()> {
        sqlx::query(
            "INSERT INTO vector_verification_task
                 (task_id, task_type, status, creator_id, filter_conditions, total_count,
                  processed_count, verified_count, missing_count, error_count, batch_size,
                  error_message, started_at, completed_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(&task.task_id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.creator_id)
        .bind(&task.filter_conditions)
        .bind(task.total_count)
        .bind(task.processed_count)
        .bind(task.verified_count)
        .bind(task.missing_count)
        .bind(task.error_count)
        .bind(task.batch_size)
        .bind(&task.error_message)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<VerificationTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM vector_verification_task WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(parse_task_row).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<VerificationTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM vector_verification_task
             ORDER BY created_at DESC, task_id DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(parse_task_row).collect()
    }

    async fn find_running(&self) -> Result<Option<VerificationTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM vector_verification_task
             WHERE status = 'running'
             LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(parse_task_row).transpose()
    }

    async fn mark_running(&self, task_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE vector_verification_task
             SET status = 'running', started_at = NOW()
             WHERE task_id = $1 AND status = 'pending'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            // uq_vector_verification_task_running
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict("a verification task is already running".to_string())
            }
            other => Error::Database(other),
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "verification task {task_id} is not pending"
            )));
        }
        Ok(())
    }

    async fn update_progress(&self, task_id: &str, progress: &TaskProgress) -> Result<()> {
        sqlx::query(
            "UPDATE vector_verification_task
             SET processed_count = $2, verified_count = $3, missing_count = $4, error_count = $5
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(progress.processed)
        .bind(progress.verified)
        .bind(progress.missing)
        .bind(progress.errors)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        error_message: &str,
        progress: &TaskProgress,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE vector_verification_task
             SET status = $2, error_message = $3, processed_count = $4, verified_count = $5,
                 missing_count = $6, error_count = $7, completed_at = NOW()
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(progress.processed)
        .bind(progress.verified)
        .bind(progress.missing)
        .bind(progress.errors)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

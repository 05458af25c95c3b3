//! Repository for the owned `file_vector` table.
//!
//! Every state transition is a single explicit-column statement, so a
//! concurrent writer can only ever lose a whole transition, never half of one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use tracing::warn;

use viss_core::defaults::VERIFY_STALE_AFTER_HOURS;
use viss_core::{
    ActualStatus, Error, FileVector, FileVectorRepository, ReconcileCandidate, Result,
    StatusCounts, VectorStatus, VerificationFilter, VerifyCursor,
};

const VECTOR_COLUMNS: &str = "file_id, description, model, dimension, status, actual_status, \
     retry_count, last_retry_at, last_verified, verification_error, error_message, \
     created_at, updated_at";

/// PostgreSQL implementation of FileVectorRepository.
#[derive(Clone)]
pub struct PgFileVectorRepository {
    pool: Pool<Postgres>,
}

impl PgFileVectorRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn execute_update(&self, sql: &str, file_id: &str, message: Option<&str>) -> Result<u64> {
        let mut query = sqlx::query(sql).bind(file_id);
        if let Some(message) = message {
            query = query.bind(message);
        }
        let result = query.execute(&self.pool).await.map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

fn parse_vector_row(row: &PgRow) -> Result<FileVector> {
    let status: String = row.get("status");
    let actual_status: String = row.get("actual_status");
    Ok(FileVector {
        file_id: row.get("file_id"),
        description: row.get("description"),
        model: row.get("model"),
        dimension: row.get("dimension"),
        status: status.parse()?,
        actual_status: actual_status.parse()?,
        retry_count: row.get("retry_count"),
        last_retry_at: row.get("last_retry_at"),
        last_verified: row.get("last_verified"),
        verification_error: row.get("verification_error"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Append the WHERE predicate for a verification filter.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &VerificationFilter) {
    match filter {
        VerificationFilter::FileIds(ids) => {
            qb.push("file_id = ANY(").push_bind(ids.clone()).push(")");
        }
        VerificationFilter::ForceFullCheck => {
            qb.push("status = 'completed'");
        }
        VerificationFilter::NeedsVerification => {
            let stale_before = Utc::now() - chrono::Duration::hours(VERIFY_STALE_AFTER_HOURS);
            qb.push(
                "(status = 'completed' OR actual_status IN ('unknown', 'missing') \
                 OR last_verified IS NULL OR last_verified < ",
            )
            .push_bind(stale_before)
            .push(")");
        }
        VerificationFilter::ActualStatus(actual) => {
            qb.push("actual_status = ").push_bind(actual.as_str());
        }
    }
}

#[async_trait]
impl FileVectorRepository for PgFileVectorRepository {
    async fn get(&self, file_id: &str) -> Result<Option<FileVector>> {
        let row = sqlx::query(&format!(
            "SELECT {VECTOR_COLUMNS} FROM file_vector WHERE file_id = $1"
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(parse_vector_row).transpose()
    }

    async fn ensure_pending(
        &self,
        file_id: &str,
        description: &str,
        model: &str,
        dimension: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO file_vector (file_id, description, model, dimension, status, actual_status)
             VALUES ($1, $2, $3, $4, 'pending', 'unknown')
             ON CONFLICT (file_id) DO NOTHING",
        )
        .bind(file_id)
        .bind(description)
        .bind(model)
        .bind(dimension)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_processing(&self, file_id: &str) -> Result<()> {
        self.execute_update(
            "UPDATE file_vector SET status = 'processing', error_message = '', updated_at = NOW()
             WHERE file_id = $1",
            file_id,
            None,
        )
        .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        file_id: &str,
        description: &str,
        model: &str,
        dimension: i32,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_vector (file_id, description, model, dimension, status, actual_status)
             VALUES ($1, $2, $3, $4, 'completed', 'unknown')
             ON CONFLICT (file_id) DO UPDATE SET
                 status = 'completed',
                 retry_count = 0,
                 error_message = '',
                 description = EXCLUDED.description,
                 model = EXCLUDED.model,
                 dimension = EXCLUDED.dimension,
                 updated_at = NOW()",
        )
        .bind(file_id)
        .bind(description)
        .bind(model)
        .bind(dimension)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn increment_retry(&self, file_id: &str, max: i32) -> Result<i32> {
        let row = sqlx::query(
            "UPDATE file_vector
             SET retry_count = LEAST(retry_count + 1, $2), last_retry_at = NOW(), updated_at = NOW()
             WHERE file_id = $1
             RETURNING retry_count",
        )
        .bind(file_id)
        .bind(max)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|r| r.get::<i32, _>("retry_count"))
            .ok_or_else(|| Error::NotFound(format!("file_vector {file_id}")))
    }

    async fn mark_pending(&self, file_id: &str, error_message: &str) -> Result<()> {
        self.execute_update(
            "UPDATE file_vector SET status = 'pending', error_message = $2, updated_at = NOW()
             WHERE file_id = $1",
            file_id,
            Some(error_message),
        )
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, file_id: &str, error_message: &str) -> Result<()> {
        self.execute_update(
            "UPDATE file_vector SET status = 'failed', error_message = $2, updated_at = NOW()
             WHERE file_id = $1",
            file_id,
            Some(error_message),
        )
        .await?;
        Ok(())
    }

    async fn list_enqueueable(&self, limit: i64, max_retries: i32) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT file_id FROM file_vector
             WHERE status IN ('pending', 'reset')
                OR (status = 'failed' AND retry_count < $2)
             ORDER BY created_at ASC, file_id ASC
             LIMIT $1",
        )
        .bind(limit)
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|r| r.get("file_id")).collect())
    }

    async fn list_ids_by_status(&self, status: VectorStatus, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT file_id FROM file_vector
             WHERE status = $1
             ORDER BY created_at ASC, file_id ASC
             LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|r| r.get("file_id")).collect())
    }

    async fn reconcile_candidates(
        &self,
        after: Option<&str>,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<ReconcileCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT a.file_id, a.description, (v.file_id IS NOT NULL) AS has_vector
            FROM file_ai_info a
            LEFT JOIN file_vector v ON v.file_id = a.file_id
            WHERE a.description <> ''
              AND ($3::text IS NULL OR a.file_id > $3)
              AND NOT EXISTS (
                  SELECT 1 FROM file f
                  WHERE f.id = a.file_id AND f.status = 'pending_deletion'
              )
              AND (
                  v.file_id IS NULL
                  OR v.status IN ('pending', 'reset', 'stale')
                  OR (v.status = 'failed' AND v.retry_count < $2)
              )
            ORDER BY a.file_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(max_retries)
        .bind(after)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| ReconcileCandidate {
                file_id: r.get("file_id"),
                description: r.get("description"),
                has_vector: r.get("has_vector"),
            })
            .collect())
    }

    async fn count_for_verification(&self, filter: &VerificationFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS n FROM file_vector WHERE ");
        push_filter(&mut qb, filter);

        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("n"))
    }

    async fn list_for_verification(
        &self,
        filter: &VerificationFilter,
        after: Option<&VerifyCursor>,
        limit: i64,
    ) -> Result<Vec<FileVector>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {VECTOR_COLUMNS} FROM file_vector WHERE "
        ));
        push_filter(&mut qb, filter);
        if let Some(cursor) = after {
            qb.push(" AND (created_at, file_id) > (")
                .push_bind(cursor.created_at)
                .push(", ")
                .push_bind(cursor.file_id.clone())
                .push(")");
        }
        qb.push(" ORDER BY created_at ASC, file_id ASC LIMIT ")
            .push_bind(limit);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(parse_vector_row).collect()
    }

    async fn record_verification(
        &self,
        file_id: &str,
        actual: ActualStatus,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE file_vector
             SET actual_status = $2, verification_error = $3, last_verified = NOW()
             WHERE file_id = $1",
        )
        .bind(file_id)
        .bind(actual.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn reset_for_repair(&self, file_id: &str) -> Result<bool> {
        let affected = self
            .execute_update(
                "UPDATE file_vector
                 SET status = 'pending', actual_status = 'unknown', verification_error = '',
                     retry_count = 0, error_message = '', updated_at = NOW()
                 WHERE file_id = $1",
                file_id,
                None,
            )
            .await?;
        Ok(affected > 0)
    }

    async fn list_problem_ids(&self, include_unknown: bool, limit: i64) -> Result<Vec<String>> {
        let labels: Vec<&str> = if include_unknown {
            vec![ActualStatus::Missing.as_str(), ActualStatus::Unknown.as_str()]
        } else {
            vec![ActualStatus::Missing.as_str()]
        };

        let rows = sqlx::query(
            "SELECT file_id FROM file_vector
             WHERE status = 'completed' AND actual_status = ANY($1)
             ORDER BY created_at ASC, file_id ASC
             LIMIT $2",
        )
        .bind(labels)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|r| r.get("file_id")).collect())
    }

    async fn reset_retry(&self, file_id: &str) -> Result<bool> {
        let affected = self
            .execute_update(
                "UPDATE file_vector
                 SET status = 'pending', retry_count = 0, error_message = '', updated_at = NOW()
                 WHERE file_id = $1",
                file_id,
                None,
            )
            .await?;
        Ok(affected > 0)
    }

    async fn reset_all(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE file_vector
             SET status = 'reset', retry_count = 0, error_message = '',
                 actual_status = 'unknown', verification_error = '', updated_at = NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn recover_stuck(&self, before: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "UPDATE file_vector
             SET status = 'pending', updated_at = NOW()
             WHERE status IN ('processing', 'running') AND updated_at < $1
             RETURNING file_id",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|r| r.get("file_id")).collect())
    }

    async fn delete(&self, file_id: &str) -> Result<bool> {
        let affected = self
            .execute_update("DELETE FROM file_vector WHERE file_id = $1", file_id, None)
            .await?;
        Ok(affected > 0)
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows = sqlx::query(
            "SELECT status, actual_status, COUNT(*) AS n
             FROM file_vector
             GROUP BY status, actual_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let actual: String = row.get("actual_status");
            let n: i64 = row.get("n");
            match (status.parse::<VectorStatus>(), actual.parse::<ActualStatus>()) {
                (Ok(status), Ok(actual)) => counts.add_n(status, actual, n),
                _ => warn!(
                    subsystem = "database",
                    component = "file_vector",
                    status = %status,
                    actual_status = %actual,
                    rows = n,
                    "Skipping rows with unrecognised status"
                ),
            }
        }
        Ok(counts)
    }
}

//! Read-only access to the hosting platform's `file` and `file_ai_info` tables.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use viss_core::{Error, FileAiInfo, FileRecord, FileRepository, Result, SearchScope};

const FILE_COLUMNS: &str = "id, user_id, original_file_id, status, access_level, is_recommended";

/// PostgreSQL implementation of FileRepository.
#[derive(Clone)]
pub struct PgFileRepository {
    pool: Pool<Postgres>,
}

impl PgFileRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn parse_file_row(row: &PgRow) -> Result<FileRecord> {
    let status: String = row.get("status");
    let access_level: String = row.get("access_level");
    Ok(FileRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        original_file_id: row.get("original_file_id"),
        status: status.parse()?,
        access_level: access_level.parse()?,
        is_recommended: row.get("is_recommended"),
    })
}

#[async_trait]
impl FileRepository for PgFileRepository {
    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM file WHERE id = $1"))
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(parse_file_row).transpose()
    }

    async fn get_ai_info(&self, file_id: &str) -> Result<Option<FileAiInfo>> {
        let row = sqlx::query(
            "SELECT file_id, description, search_content FROM file_ai_info WHERE file_id = $1",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| FileAiInfo {
            file_id: r.get("file_id"),
            description: r.get("description"),
            search_content: r.get("search_content"),
        }))
    }

    async fn list_duplicates(&self, original_id: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM file
             WHERE original_file_id = $1 AND status <> 'pending_deletion'
             ORDER BY id"
        ))
        .bind(original_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(parse_file_row).collect()
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query("SELECT id FROM file WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    async fn hydrate(&self, ids: &[String], scope: &SearchScope) -> Result<Vec<FileRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let base = format!(
            "SELECT {FILE_COLUMNS} FROM file WHERE id = ANY($1) AND status <> 'pending_deletion'"
        );
        let rows = match scope {
            SearchScope::Public => sqlx::query(&format!(
                "{base} AND access_level = 'public' AND is_recommended = TRUE"
            ))
            .bind(ids)
            .fetch_all(&self.pool)
            .await,
            SearchScope::User(user_id) => sqlx::query(&format!("{base} AND user_id = $2"))
                .bind(ids)
                .bind(*user_id)
                .fetch_all(&self.pool)
                .await,
            SearchScope::Admin => sqlx::query(&base).bind(ids).fetch_all(&self.pool).await,
        }
        .map_err(Error::Database)?;

        rows.iter().map(parse_file_row).collect()
    }
}

//! Persisted config registry values in `system_config`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};

use viss_core::{ConfigStore, Error, Result};

/// PostgreSQL implementation of ConfigStore.
#[derive(Clone)]
pub struct PgConfigStore {
    pool: Pool<Postgres>,
}

impl PgConfigStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn load_group(&self, group: &str) -> Result<Vec<(String, JsonValue)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM system_config WHERE config_group = $1 ORDER BY key",
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    async fn save(&self, group: &str, key: &str, value: &JsonValue) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_config (config_group, key, value, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (config_group, key) DO UPDATE SET value = $3, updated_at = NOW()",
        )
        .bind(group)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::engine::types::BanditState;
use crate::store::{corrupted, StateKey, StateStore, StoreError};

const BACKEND: &str = "postgres";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "learner_state" (
    "state_key" TEXT PRIMARY KEY,
    "document" JSONB NOT NULL,
    "created_at" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    "updated_at" TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Networked store. Tried first when `DATABASE_URL` is configured.
#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn load(&self, key: &StateKey) -> Result<Option<BanditState>, StoreError> {
        let document: Option<serde_json::Value> = sqlx::query_scalar(
            r#"SELECT "document" FROM "learner_state" WHERE "state_key" = $1"#,
        )
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await?;

        match document {
            // Older rows may hold the document as a JSON string.
            Some(serde_json::Value::String(text)) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| corrupted(BACKEND, e)),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| corrupted(BACKEND, e)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &StateKey, state: &BanditState) -> Result<(), StoreError> {
        let document = serde_json::to_value(state)?;
        sqlx::query(
            r#"INSERT INTO "learner_state" ("state_key","document","created_at","updated_at")
               VALUES ($1, $2, NOW(), NOW())
               ON CONFLICT ("state_key") DO UPDATE SET
                 "document" = EXCLUDED."document",
                 "updated_at" = NOW()"#,
        )
        .bind(key.storage_key())
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::engine::types::BanditState;
use crate::store::{corrupted, StateKey, StateStore, StoreError};

const BACKEND: &str = "sqlite";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "learner_state" (
    "state_key" TEXT PRIMARY KEY NOT NULL,
    "document" TEXT NOT NULL,
    "updated_at" TEXT NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn load(&self, key: &StateKey) -> Result<Option<BanditState>, StoreError> {
        let document: Option<String> = sqlx::query_scalar(
            r#"SELECT "document" FROM "learner_state" WHERE "state_key" = ?1"#,
        )
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await?;

        match document {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| corrupted(BACKEND, e)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &StateKey, state: &BanditState) -> Result<(), StoreError> {
        let document = serde_json::to_string(state)?;
        sqlx::query(
            r#"INSERT INTO "learner_state" ("state_key","document","updated_at")
               VALUES (?1, ?2, ?3)
               ON CONFLICT("state_key") DO UPDATE SET
                 "document" = excluded."document",
                 "updated_at" = excluded."updated_at""#,
        )
        .bind(key.storage_key())
        .bind(document)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::KeyValueStore;

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)";

/// SQLite-backed store. The database is opened on first use; a failed open
/// is retried by the next operation.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn pool(&self) -> Result<&SqlitePool, sqlx::Error> {
        self.pool
            .get_or_try_init(|| async {
                let options = SqliteConnectOptions::new()
                    .filename(&self.path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal);

                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options)
                    .await?;

                sqlx::query(CREATE_TABLE).execute(&pool).await?;
                debug!(path = ?self.path, "Opened key-value store");
                Ok::<_, sqlx::Error>(pool)
            })
            .await
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let pool = self.pool().await?;
        sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    async fn try_set(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn try_delete(&self, key: &str) -> Result<(), sqlx::Error> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Close the pool, flushing the write-ahead log
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Option<String> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, path = ?self.path, "Key-value read failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> bool {
        match self.try_set(key, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, path = ?self.path, "Key-value write failed");
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match self.try_delete(key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, path = ?self.path, "Key-value delete failed");
                false
            }
        }
    }
}

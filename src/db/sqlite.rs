use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{error, info, instrument};

use super::Storage;
use crate::error::StorageError;

/// Local storage backed by a SQLite file.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    #[instrument]
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        info!(url = %url, "Opening session storage");

        // A single connection keeps `sqlite::memory:` pointing at one database.
        let pool = match SqlitePoolOptions::new().max_connections(1).connect(url).await {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "Failed to open session storage");
                return Err(e.into());
            }
        };

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM local_storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to read from session storage");
                e
            })?;

        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO local_storage (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to write to session storage");
            e
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM local_storage WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to remove from session storage");
                e
            })?;

        Ok(())
    }
}

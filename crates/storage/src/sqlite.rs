//! SQLite-backed key-value persistence.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::backend::KvBackend;
use crate::error::StorageError;

/// SQLite-backed table storage (one row per namespace).
#[derive(Debug, Clone)]
pub struct SqliteKv {
    url: String,
    /// Lazily opened pool, shared by all clones of this handle.
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteKv {
    /// Create a handle for the given `sqlite://` URL (lazy initialization).
    ///
    /// The database will be opened and migrated on first use.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Private in-memory database (kept alive on a single connection).
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Database under the OS data directory: `{data_dir}/jobscout/storage.db`.
    pub fn open_default() -> anyhow::Result<Self> {
        let db_path = default_db_path()?;
        Ok(Self::new(format!("sqlite://{}", db_path.to_string_lossy())))
    }

    fn is_memory(&self) -> bool {
        self.url.contains(":memory:")
    }

    /// Open the pool and create the table on first use.
    async fn pool(&self) -> anyhow::Result<SqlitePool> {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.as_ref() {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::from_str(&self.url)
            .with_context(|| format!("invalid SQLite URL {:?}", self.url))?
            .create_if_missing(true);

        // An in-memory database lives only as long as its connection.
        let pool_options = if self.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite storage at {:?}", self.url))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                namespace  TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv_store table")?;

        *pool_guard = Some(pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl KvBackend for SqliteKv {
    async fn load(&self, namespace: &str) -> Result<Option<Value>, StorageError> {
        let pool = self.pool().await?;

        let row = sqlx::query(
            r#"
            SELECT data
            FROM kv_store
            WHERE namespace = ?1
            "#,
        )
        .bind(namespace)
        .fetch_optional(&pool)
        .await
        .with_context(|| format!("failed to read namespace {namespace}"))?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let data: String = row
            .try_get("data")
            .context("kv_store row without data column")?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn save(&self, namespace: &str, data: Value) -> Result<(), StorageError> {
        let pool = self.pool().await?;
        let payload = serde_json::to_string(&data)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO kv_store (namespace, data, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(namespace)
            DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(&payload)
        .bind(&now)
        .execute(&pool)
        .await
        .with_context(|| format!("failed to write namespace {namespace}"))?;

        Ok(())
    }

    async fn remove(&self, namespace: &str) -> Result<(), StorageError> {
        let pool = self.pool().await?;

        sqlx::query(
            r#"
            DELETE FROM kv_store
            WHERE namespace = ?1
            "#,
        )
        .bind(namespace)
        .execute(&pool)
        .await
        .with_context(|| format!("failed to remove namespace {namespace}"))?;

        Ok(())
    }
}

/// Resolve `{app_data_dir}/jobscout/storage.db`, creating the directory.
fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut dir = base;
    dir.push("jobscout");

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create storage directory at {:?}", dir))?;

    dir.push("storage.db");
    Ok(dir)
}

//! Local key/value persistence.
//!
//! The queue and the offline cache only need string values under string
//! keys. `SqliteStore` keeps them in a single table on disk; `InMemoryStore`
//! is for tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage quota exceeded writing {bytes} bytes under {key}")]
    QuotaExceeded { key: String, bytes: usize },
}

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        StorageError::Backend(format!("{err:#}"))
    }
}

/// String key/value storage with no cross-key transactions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys, in ascending order.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory store with an optional byte quota.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push the total stored bytes over `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Make every operation fail with [`StorageError::Backend`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Backend("in-memory store is failing".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_available()?;
        let mut entries = self.entries.write().await;

        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let bytes = key.len() + value.len();
            if others + bytes > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    bytes,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_available()?;
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[derive(Debug, Clone)]
enum SqliteTarget {
    File(PathBuf),
    Memory,
}

/// SQLite-backed store.
///
/// Cheap to clone. The pool and the `kv_store` table are created on first use.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    target: SqliteTarget,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteStore {
    /// Store backed by the database file at `path`; parent directories are
    /// created on first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            target: SqliteTarget::File(path.into()),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Private in-memory database, lost when the store is dropped.
    pub fn in_memory() -> Self {
        Self {
            target: SqliteTarget::Memory,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    async fn ensure_initialized(&self) -> anyhow::Result<SqlitePool> {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = match &self.target {
            SqliteTarget::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create offline storage directory at {:?}", parent)
                    })?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                SqlitePool::connect_with(options)
                    .await
                    .with_context(|| format!("failed to open offline database at {:?}", path))?
            }
            // A single connection that never expires; each new connection to
            // `:memory:` would see an empty database.
            SqliteTarget::Memory => SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await
                .context("failed to open in-memory offline database")?,
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
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
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let pool = self.ensure_initialized().await?;
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .with_context(|| format!("failed to read {key}"))?;

        match row {
            Some(row) => Ok(Some(
                row.try_get::<String, _>("value")
                    .with_context(|| format!("failed to decode value of {key}"))?,
            )),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let pool = self.ensure_initialized().await?;
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .with_context(|| format!("failed to write {key}"))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let pool = self.ensure_initialized().await?;
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await
            .with_context(|| format!("failed to remove {key}"))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let pool = self.ensure_initialized().await?;
        let rows = sqlx::query("SELECT key FROM kv_store ORDER BY key ASC")
            .fetch_all(&pool)
            .await
            .context("failed to list keys")?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(row.try_get::<String, _>("key").context("failed to decode key")?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_enforces_its_quota() {
        let store = InMemoryStore::new().with_quota(16);
        store.set("a", "12345").await.unwrap();

        let err = store.set("b", "1234567890123").await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { ref key, .. } if key == "b"));

        // Overwriting a key only counts its new size.
        store.set("a", "123456789012345").await.unwrap();
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn failing_in_memory_store_reports_backend_errors() {
        let store = InMemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.set_failing(true);

        assert!(matches!(store.get("k").await, Err(StorageError::Backend(_))));
        store.set_failing(false);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn sqlite_store_upserts_and_lists_keys() {
        let store = SqliteStore::in_memory();

        assert_eq!(store.get("engage360_programs").await.unwrap(), None);
        store.set("engage360_programs", "[]").await.unwrap();
        store.set("engage360_programs", "[1]").await.unwrap();
        store.set("engage360_bookings", "[2]").await.unwrap();

        assert_eq!(
            store.get("engage360_programs").await.unwrap().as_deref(),
            Some("[1]")
        );
        assert_eq!(
            store.keys().await.unwrap(),
            vec!["engage360_bookings".to_string(), "engage360_programs".to_string()]
        );

        store.remove("engage360_bookings").await.unwrap();
        assert_eq!(store.get("engage360_bookings").await.unwrap(), None);
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};

use super::{KvStore, StoreError};

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

/// SQLite-backed store. Lists are kept as a JSON array in a single row.
pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open sqlite store at {}", path.display()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_entries_expires_at ON kv_entries(expires_at)")
            .execute(&pool)
            .await?;

        tracing::info!("Session store opened at {}", path.display());

        Ok(Self { pool, path })
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pulse")
            .join("sessions.db")
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn expiry_ms(ttl: Duration) -> i64 {
        Self::now_ms() + ttl.num_milliseconds()
    }

    fn decode_list(key: &str, raw: &str) -> Result<Vec<String>, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(Self::now_ms())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::expiry_ms(ttl))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        // Expired counters restart at 1 instead of continuing from the stale value
        let row = sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, '1', ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = CASE
                    WHEN kv_entries.expires_at <= ?2 THEN '1'
                    ELSE CAST(CAST(kv_entries.value AS INTEGER) + 1 AS TEXT)
                END,
                expires_at = excluded.expires_at
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(Self::now_ms())
        .bind(Self::expiry_ms(ttl))
        .fetch_one(&self.pool)
        .await?;

        let raw: String = row.get("value");
        raw.parse::<i64>().map_err(|e| StoreError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn push_trim(
        &self,
        key: &str,
        value: &str,
        keep: usize,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Self::now_ms();
        let mut tx = self.pool.begin().await?;

        // Writing first takes the write lock before the read below
        sqlx::query("DELETE FROM kv_entries WHERE key = ? AND expires_at <= ?")
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

        let mut items = match row {
            Some(row) => Self::decode_list(key, &row.get::<String, _>("value"))?,
            None => Vec::new(),
        };

        items.push(value.to_string());
        if items.len() > keep {
            items.drain(..items.len() - keep);
        }

        let encoded = serde_json::to_string(&items).map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(encoded)
        .bind(now + ttl.num_milliseconds())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn tail(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let Some(raw) = self.get(key).await? else {
            return Ok(Vec::new());
        };

        let mut items = Self::decode_list(key, &raw)?;
        if items.len() > n {
            items.drain(..items.len() - n);
        }
        Ok(items)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(Self::now_ms())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Session store closed: {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested").join("store.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip_and_expiry() {
        let (_dir, store) = open_temp().await;
        store.set("name:s1", "Ana", Duration::days(30)).await.unwrap();
        assert_eq!(store.get("name:s1").await.unwrap().as_deref(), Some("Ana"));

        store.set("name:s2", "Bea", Duration::zero()).await.unwrap();
        assert_eq!(store.get("name:s2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_restarts_after_expiry() {
        let (_dir, store) = open_temp().await;
        assert_eq!(store.incr("usage", Duration::hours(48)).await.unwrap(), 1);
        assert_eq!(store.incr("usage", Duration::zero()).await.unwrap(), 2);
        assert_eq!(store.incr("usage", Duration::hours(48)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_push_trim_and_tail() {
        let (_dir, store) = open_temp().await;
        for word in ["a", "b", "c", "d"] {
            store.push_trim("history", word, 3, Duration::days(7)).await.unwrap();
        }
        assert_eq!(store.tail("history", 10).await.unwrap(), vec!["b", "c", "d"]);
        assert_eq!(store.tail("history", 1).await.unwrap(), vec!["d"]);
        assert!(store.tail("missing", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_and_close() {
        let (_dir, store) = open_temp().await;
        store.set("old", "x", Duration::zero()).await.unwrap();
        store.set("new", "y", Duration::hours(1)).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        store.ping().await.unwrap();

        store.close().await;
        let err = store.get("new").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{SecurityStore, StoreError, StoreResult};

/// Durable store backend over SQLite.
///
/// The pool holds a single connection, so every operation — including the
/// multi-statement `window_slide` transaction — serializes through one
/// writer.  That is what makes the window batch atomic on this backend.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS kv (
        k TEXT PRIMARY KEY,
        v TEXT NOT NULL,
        expires_at_ms INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS set_member (
        k TEXT NOT NULL,
        member TEXT NOT NULL,
        expires_at_ms INTEGER,
        PRIMARY KEY (k, member)
    )",
    "CREATE TABLE IF NOT EXISTS window_marker (
        k TEXT NOT NULL,
        ts_ms INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_window_marker_k_ts ON window_marker (k, ts_ms)",
];

impl SqliteStore {
    /// Open (creating if missing) a store at the given file path.
    pub async fn open(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(to_store_error)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        Self::connect(options).await
    }

    /// Ephemeral in-memory store, used by tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(to_store_error)?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(to_store_error)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(to_store_error)?;
        }

        info!("SQLite security store ready");
        Ok(Self { pool })
    }
}

fn to_store_error(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn expiry_ms(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|t| epoch_ms() + t.as_millis() as i64)
}

#[async_trait]
impl SecurityStore for SqliteStore {
    async fn put_value(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        sqlx::query("INSERT OR REPLACE INTO kv (k, v, expires_at_ms) VALUES (?1, ?2, ?3)")
            .bind(key)
            .bind(value)
            .bind(expiry_ms(ttl))
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT v, expires_at_ms FROM kv WHERE k = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(to_store_error)?;

        match row {
            Some((_, Some(expires))) if expires <= epoch_ms() => {
                // Lazy expiry on read.
                self.delete_value(key).await?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn delete_value(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv WHERE k = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn index_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires = expiry_ms(ttl);
        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        sqlx::query("INSERT OR REPLACE INTO set_member (k, member, expires_at_ms) VALUES (?1, ?2, ?3)")
            .bind(key)
            .bind(member)
            .bind(expires)
            .execute(&mut *tx)
            .await
            .map_err(to_store_error)?;

        // Refresh the whole set's expiry, matching the KV TTL semantics.
        sqlx::query("UPDATE set_member SET expires_at_ms = ?1 WHERE k = ?2")
            .bind(expires)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(to_store_error)?;

        tx.commit().await.map_err(to_store_error)
    }

    async fn index_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let now = epoch_ms();
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT member FROM set_member
             WHERE k = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)",
        )
        .bind(key)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(to_store_error)?;

        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    async fn index_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM set_member WHERE k = ?1 AND member = ?2")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn index_clear(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM set_member WHERE k = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn window_slide(&self, key: &str, now_ms: u64, window_ms: u64) -> StoreResult<u64> {
        let now = now_ms as i64;
        let floor = now - window_ms as i64;

        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        // Lazy prune; 2×window retention is subsumed because anything older
        // than the window floor is dropped on every touch.
        sqlx::query("DELETE FROM window_marker WHERE k = ?1 AND ts_ms < ?2")
            .bind(key)
            .bind(floor)
            .execute(&mut *tx)
            .await
            .map_err(to_store_error)?;

        let count_before: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM window_marker WHERE k = ?1")
                .bind(key)
                .fetch_one(&mut *tx)
                .await
                .map_err(to_store_error)?;

        sqlx::query("INSERT INTO window_marker (k, ts_ms) VALUES (?1, ?2)")
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(to_store_error)?;

        tx.commit().await.map_err(to_store_error)?;

        Ok(count_before.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_roundtrip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put_value("k", "v", None).await.unwrap();
        assert_eq!(store.get_value("k").await.unwrap().as_deref(), Some("v"));

        store.delete_value("k").await.unwrap();
        assert_eq!(store.get_value("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_value_reads_as_absent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .put_value("k", "v", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get_value("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn window_slide_prunes_and_counts() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let w = 1_000u64;

        assert_eq!(store.window_slide("k", 10_000, w).await.unwrap(), 0);
        assert_eq!(store.window_slide("k", 10_500, w).await.unwrap(), 1);
        // First marker out of the window now.
        assert_eq!(store.window_slide("k", 11_100, w).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn opens_a_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.db");
        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        store.put_value("k", "v", None).await.unwrap();
        assert_eq!(store.get_value("k").await.unwrap().as_deref(), Some("v"));
    }
}

//! SQLite-backed key-value store using sqlx.

use std::{path::Path, str::FromStr, time::Duration};

use {
    async_trait::async_trait,
    parley_common::time::now_ms,
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tracing::debug,
};

use crate::{Result, error::Context as _, kv::KvStore};

/// Persistent store over a single `kv` table.
///
/// Expiry is stored as epoch millis; expired rows stay on disk until
/// [`KvStore::purge_expired`] runs but are never returned.
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    /// Connect to `database_url`, creating the file if needed, and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Open the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    /// Use an existing pool. Call [`crate::run_migrations`] first.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn expires_at(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| (now_ms() + ttl.as_millis() as u64) as i64)
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        // A single upsert: a live row makes the conflict branch a no-op.
        let result = sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
             WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at(ttl))
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at(ttl))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_ms() as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)")
                .bind(key)
                .bind(now_ms() as i64)
                .execute(&self.pool)
                .await?;
        // Drop any expired leftover as well.
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT key FROM kv
             WHERE substr(key, 1, length(?)) = ? AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .bind(now_ms() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("key")).collect())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now_ms() as i64)
            .execute(&self.pool)
            .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "purged expired keys");
        }
        Ok(purged)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc};

    async fn memory_store() -> SqliteKvStore {
        SqliteKvStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn set_nx_only_first_wins() {
        let store = memory_store().await;
        let ttl = Some(Duration::from_secs(300));
        assert!(store.set_nx("dedup:wechat:m1", "1", ttl).await.unwrap());
        assert!(!store.set_nx("dedup:wechat:m1", "2", ttl).await.unwrap());
        assert_eq!(
            store.get("dedup:wechat:m1").await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn expired_rows_are_replaced_and_hidden() {
        let store = memory_store().await;
        assert!(store.set_nx("k", "old", Some(Duration::ZERO)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys("").await.unwrap().is_empty());

        assert!(store.set_nx("k", "new", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
        // No TTL means it never expires.
        assert!(!store.set_nx("k", "newer", None).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_set_nx_yields_one_winner() {
        let store = Arc::new(memory_store().await);
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set_nx("dedup:wechat:race", &i.to_string(), Some(Duration::from_secs(60)))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn set_overwrites_and_keys_use_prefix() {
        let store = memory_store().await;
        store.set("access:u1", "1", None).await.unwrap();
        store.set("access:u1", "0", None).await.unwrap();
        store.set("access:g1", "1", None).await.unwrap();
        store.set("access_log", "x", None).await.unwrap();
        assert_eq!(store.get("access:u1").await.unwrap().as_deref(), Some("0"));
        assert_eq!(store.keys("access:").await.unwrap(), vec![
            "access:g1",
            "access:u1"
        ]);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = memory_store().await;
        store.set("gone", "1", Some(Duration::ZERO)).await.unwrap();
        store.set("kept", "1", None).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.exists("kept").await.unwrap());
        assert!(!store.del("gone").await.unwrap());
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parley.db");
        {
            let store = SqliteKvStore::open(&path).await.unwrap();
            store.set("cron:job:jiadan:g1", "{}", None).await.unwrap();
        }
        let store = SqliteKvStore::open(&path).await.unwrap();
        assert_eq!(store.keys("cron:job:").await.unwrap(), vec![
            "cron:job:jiadan:g1"
        ]);
    }
}

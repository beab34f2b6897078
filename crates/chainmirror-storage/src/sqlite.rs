//! SQLite backend for the keyed sorted store.
//!
//! Records live in one table keyed by `(model, key)`; secondary index entries
//! live in a second table ordered by `(model, idx, partition, sort, key)`, so
//! a range scan is a single index walk. Uses `sqlx` with WAL mode so readers
//! are not blocked by the indexer's writes.
//!
//! # Usage
//! ```rust,no_run
//! use chainmirror_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./mirror.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainmirror_core::error::IndexerError;
use chainmirror_core::store::{Direction, KeyedStore, ScanQuery, StoredRecord};

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed [`KeyedStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./mirror.db"`) or a full
    /// SQLite URL (`"sqlite:./mirror.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        debug!(path, "sqlite store opened");
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every SQLite connection gets its own private in-memory database, so the
    /// pool is pinned to a single connection.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                model      TEXT NOT NULL,
                key        TEXT NOT NULL,
                value_json TEXT NOT NULL,
                PRIMARY KEY (model, key)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indices (
                model     TEXT NOT NULL,
                idx       TEXT NOT NULL,
                partition TEXT NOT NULL,
                sort      TEXT NOT NULL,
                key       TEXT NOT NULL,
                PRIMARY KEY (model, idx, partition, sort, key)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Index rows of one record, for replacement on put and removal on delete.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_indices_record ON indices (model, key);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    /// Number of records stored for `model`.
    pub async fn count(&self, model: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM records WHERE model = ?")
            .bind(model)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[async_trait]
impl KeyedStore for SqliteStore {
    async fn get(&self, model: &str, key: &str) -> Result<Option<Value>, IndexerError> {
        let row = sqlx::query("SELECT value_json FROM records WHERE model = ? AND key = ?")
            .bind(model)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(r) => {
                let raw: String = r.get("value_json");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, model: &str, record: StoredRecord) -> Result<(), IndexerError> {
        let value = serde_json::to_string(&record.value)?;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("DELETE FROM indices WHERE model = ? AND key = ?")
            .bind(model)
            .bind(&record.key)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query("INSERT OR REPLACE INTO records (model, key, value_json) VALUES (?, ?, ?)")
            .bind(model)
            .bind(&record.key)
            .bind(&value)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for entry in &record.indices {
            sqlx::query(
                "INSERT OR REPLACE INTO indices (model, idx, partition, sort, key)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(model)
            .bind(entry.index)
            .bind(&entry.partition)
            .bind(&entry.sort)
            .bind(&record.key)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(model, key = %record.key, "record stored");
        Ok(())
    }

    async fn delete(&self, model: &str, key: &str) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("DELETE FROM indices WHERE model = ? AND key = ?")
            .bind(model)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query("DELETE FROM records WHERE model = ? AND key = ?")
            .bind(model)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)
    }

    async fn scan(&self, model: &str, query: &ScanQuery) -> Result<Vec<Value>, IndexerError> {
        let (cmp, order) = match query.direction {
            Direction::Asc => (">", "ASC"),
            Direction::Desc => ("<", "DESC"),
        };
        let bound = match query.exclusive_bound {
            Some(_) => format!("AND i.sort {cmp} ?"),
            None => String::new(),
        };
        let sql = format!(
            "SELECT r.value_json FROM indices i
             JOIN records r ON r.model = i.model AND r.key = i.key
             WHERE i.model = ? AND i.idx = ? AND i.partition = ? {bound}
             ORDER BY i.sort {order}, i.key {order}
             LIMIT ?"
        );

        let mut q = sqlx::query(&sql)
            .bind(model)
            .bind(query.index)
            .bind(query.partition_key());
        if let Some(b) = &query.exclusive_bound {
            q = q.bind(b);
        }
        let rows = q
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.into_iter()
            .map(|r| {
                let raw: String = r.get("value_json");
                serde_json::from_str(&raw).map_err(IndexerError::from)
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

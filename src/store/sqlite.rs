//! Embedded SQLite backend.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{
    create_table_sql, sqlite_placeholders, CachedEmbedding, EmbeddingStore, SQL_CREATE_INDEX,
    SQL_DELETE_BATCH, SQL_GET, SQL_MAX_ID, SQL_PUT, SQL_TOUCH,
};
use crate::error::Result;

/// File-backed (or in-memory) store. WAL mode is enabled at open so one
/// writer can proceed alongside concurrent readers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a database at `path`; `:memory:` and `file:` URIs are accepted.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

#[async_trait::async_trait]
impl EmbeddingStore for SqliteStore {
    async fn get(
        &self,
        input_hash: &str,
        model: &str,
        dimension: i32,
    ) -> Result<Option<CachedEmbedding>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                &sqlite_placeholders(SQL_GET),
                params![input_hash, model, dimension],
                |row| {
                    Ok(CachedEmbedding {
                        content: row.get(0)?,
                        created_at: row.get(1)?,
                        last_accessed_at: row.get(2)?,
                    })
                },
            )
            .optional()?;

        let Some(entry) = row else {
            metrics::counter!("cachembed_cache_misses_total", "backend" => "sqlite").increment(1);
            return Ok(None);
        };

        // Bump the access time in the same transaction as the read.
        tx.execute(
            &sqlite_placeholders(SQL_TOUCH),
            params![Utc::now(), input_hash, model, dimension],
        )?;
        tx.commit()?;

        metrics::counter!("cachembed_cache_hits_total", "backend" => "sqlite").increment(1);
        Ok(Some(entry))
    }

    async fn put(
        &self,
        input_hash: &str,
        model: &str,
        dimension: i32,
        content: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            &sqlite_placeholders(SQL_PUT),
            params![input_hash, model, dimension, content, now, now],
        )?;
        Ok(())
    }

    async fn delete_batch(
        &self,
        start_id: i64,
        end_id: i64,
        threshold: DateTime<Utc>,
    ) -> Result<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            &sqlite_placeholders(SQL_DELETE_BATCH),
            params![start_id, end_id, threshold],
        )?;
        Ok(deleted as u64)
    }

    async fn max_id(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let max_id = conn.query_row(SQL_MAX_ID, [], |row| row.get(0))?;
        Ok(max_id)
    }

    async fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &create_table_sql("INTEGER PRIMARY KEY AUTOINCREMENT", "TIMESTAMP"),
            [],
        )?;
        conn.execute(SQL_CREATE_INDEX, [])?;
        Ok(())
    }
}

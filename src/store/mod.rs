//! Persistence for cached embeddings.
//!
//! Two backends share one schema and one set of statements: an embedded
//! SQLite file (the default) and a PostgreSQL server selected by a
//! `postgres://` DSN. Statements are authored once with numeric `$n`
//! placeholders; the SQLite backend rewrites them to its `?n` form before
//! preparing.

mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// One cached vector as read from the store.
#[derive(Debug, Clone)]
pub struct CachedEmbedding {
    /// Base64-encoded little-endian float32 bytes, stored verbatim.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

pub(crate) const SQL_GET: &str = "\
SELECT content, created_at, last_accessed_at FROM embeddings \
WHERE input_hash = $1 AND model = $2 AND dimension = $3";

pub(crate) const SQL_TOUCH: &str = "\
UPDATE embeddings SET last_accessed_at = $1 \
WHERE input_hash = $2 AND model = $3 AND dimension = $4";

pub(crate) const SQL_PUT: &str = "\
INSERT INTO embeddings (input_hash, model, dimension, content, created_at, last_accessed_at) \
VALUES ($1, $2, $3, $4, $5, $6) \
ON CONFLICT (input_hash, model, dimension) DO UPDATE \
SET content = excluded.content, last_accessed_at = excluded.last_accessed_at";

pub(crate) const SQL_DELETE_BATCH: &str = "\
DELETE FROM embeddings \
WHERE id >= $1 AND id < $2 AND last_accessed_at < $3";

pub(crate) const SQL_MAX_ID: &str = "SELECT COALESCE(MAX(id), 0) FROM embeddings";

pub(crate) const SQL_CREATE_INDEX: &str = "\
CREATE INDEX IF NOT EXISTS idx_hash_model_dimension \
ON embeddings (input_hash, model, dimension)";

/// The table definition, parameterized over the dialect's primary-key clause
/// and timestamp type.
pub(crate) fn create_table_sql(primary_key: &str, timestamp: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS embeddings (
            id {primary_key},
            input_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dimension INTEGER NOT NULL DEFAULT 0,
            content TEXT NOT NULL,
            created_at {timestamp} NOT NULL,
            last_accessed_at {timestamp} NOT NULL,
            UNIQUE (input_hash, model, dimension)
        )"
    )
}

/// Rewrite `$1, $2, …` placeholders to SQLite's `?1, ?2, …` form.
pub(crate) fn sqlite_placeholders(sql: &str) -> String {
    sql.replace('$', "?")
}

/// Storage backend for cached embeddings.
///
/// Implementations rely on the engine's own transactional guarantees; no
/// application-level locking is layered on top, and racing writers for the
/// same key converge through the unique `(input_hash, model, dimension)`
/// constraint.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Look up one entry, bumping `last_accessed_at` on a hit. A missing row
    /// is `Ok(None)`; only transport-level failures are errors.
    async fn get(
        &self,
        input_hash: &str,
        model: &str,
        dimension: i32,
    ) -> Result<Option<CachedEmbedding>>;

    /// Insert or replace the entry for `(input_hash, model, dimension)`.
    async fn put(&self, input_hash: &str, model: &str, dimension: i32, content: &str)
        -> Result<()>;

    /// Delete rows in `[start_id, end_id)` whose `last_accessed_at` is older
    /// than `threshold`. Returns the number of rows deleted.
    async fn delete_batch(
        &self,
        start_id: i64,
        end_id: i64,
        threshold: DateTime<Utc>,
    ) -> Result<u64>;

    /// Current maximum row id, or 0 when the table is empty.
    async fn max_id(&self) -> Result<i64>;

    /// Idempotent create-if-absent for the table and index.
    async fn migrate(&self) -> Result<()>;

    /// Walk `[start_id, end_id)` in `batch_size` id-ranges, deleting entries
    /// last accessed before `threshold` and sleeping between batches.
    ///
    /// Bounding every batch by id range keeps the per-statement working set
    /// predictable on either dialect, and replaying a range is a no-op, so
    /// an interrupted run can simply be restarted.
    async fn delete_range(
        &self,
        threshold: DateTime<Utc>,
        start_id: i64,
        end_id: i64,
        batch_size: i64,
        sleep: Duration,
    ) -> Result<u64> {
        let mut total_deleted: u64 = 0;
        let mut cursor = start_id;

        while cursor < end_id {
            let batch_end = (cursor + batch_size).min(end_id);
            let batch_deleted = self.delete_batch(cursor, batch_end, threshold).await?;
            total_deleted += batch_deleted;

            tracing::info!(
                current_id = cursor,
                batch_end_id = batch_end,
                batch_deleted,
                total_deleted,
                threshold = %threshold,
                "batch deletion progress"
            );

            if !sleep.is_zero() {
                tokio::time::sleep(sleep).await;
            }

            cursor = batch_end;
        }

        Ok(total_deleted)
    }
}

/// Open the backend selected by the DSN and run migrations.
///
/// `postgres://` and `postgresql://` URLs select the server backend;
/// anything else (a filesystem path, `:memory:`, or a `file:` URI) is
/// treated as an SQLite database.
pub async fn open(dsn: &str) -> Result<Arc<dyn EmbeddingStore>> {
    let store: Arc<dyn EmbeddingStore> =
        if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
            Arc::new(PostgresStore::connect(dsn).await?)
        } else {
            Arc::new(SqliteStore::open(dsn)?)
        };
    store.migrate().await?;
    tracing::info!(dsn, "database initialized");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_placeholders_for_sqlite() {
        assert_eq!(
            sqlite_placeholders("SELECT * FROM t WHERE a = $1 AND b = $2"),
            "SELECT * FROM t WHERE a = ?1 AND b = ?2"
        );
        // Postgres statements are used as authored.
        assert!(SQL_PUT.contains("$6"));
    }

    #[test]
    fn table_sql_carries_dialect_clauses() {
        let sql = create_table_sql("INTEGER PRIMARY KEY AUTOINCREMENT", "TIMESTAMP");
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("UNIQUE (input_hash, model, dimension)"));

        let sql = create_table_sql("BIGSERIAL PRIMARY KEY", "TIMESTAMPTZ");
        assert!(sql.contains("id BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("created_at TIMESTAMPTZ NOT NULL"));
    }
}

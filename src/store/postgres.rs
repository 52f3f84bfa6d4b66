//! PostgreSQL backend over a connection pool.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::{
    create_table_sql, CachedEmbedding, EmbeddingStore, SQL_CREATE_INDEX, SQL_DELETE_BATCH,
    SQL_GET, SQL_MAX_ID, SQL_PUT, SQL_TOUCH,
};
use crate::error::Result;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl EmbeddingStore for PostgresStore {
    async fn get(
        &self,
        input_hash: &str,
        model: &str,
        dimension: i32,
    ) -> Result<Option<CachedEmbedding>> {
        let row = sqlx::query(SQL_GET)
            .bind(input_hash)
            .bind(model)
            .bind(dimension)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            metrics::counter!("cachembed_cache_misses_total", "backend" => "postgres").increment(1);
            return Ok(None);
        };

        let entry = CachedEmbedding {
            content: row.try_get(0)?,
            created_at: row.try_get(1)?,
            last_accessed_at: row.try_get(2)?,
        };

        // Second statement rather than a transaction; losing the bump must
        // never lose the hit, so a failure here is only logged.
        if let Err(e) = sqlx::query(SQL_TOUCH)
            .bind(Utc::now())
            .bind(input_hash)
            .bind(model)
            .bind(dimension)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, input_hash, "failed to update last_accessed_at");
        }

        metrics::counter!("cachembed_cache_hits_total", "backend" => "postgres").increment(1);
        Ok(Some(entry))
    }

    async fn put(
        &self,
        input_hash: &str,
        model: &str,
        dimension: i32,
        content: &str,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(SQL_PUT)
            .bind(input_hash)
            .bind(model)
            .bind(dimension)
            .bind(content)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_batch(
        &self,
        start_id: i64,
        end_id: i64,
        threshold: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(SQL_DELETE_BATCH)
            .bind(start_id)
            .bind(end_id)
            .bind(threshold)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn max_id(&self) -> Result<i64> {
        let row = sqlx::query(SQL_MAX_ID).fetch_one(&self.pool).await?;
        Ok(row.try_get(0)?)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(&create_table_sql("BIGSERIAL PRIMARY KEY", "TIMESTAMPTZ"))
            .execute(&self.pool)
            .await?;
        sqlx::query(SQL_CREATE_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

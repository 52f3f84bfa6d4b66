//! Garbage collection over the embeddings table.
//!
//! Deletion is scoped to an id range and walked in fixed-size batches so a
//! run never holds a large working set on a live table; the optional sleep
//! lets operators pace deletion against replica lag or checkpoint pressure.

use std::time::Duration;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::store::EmbeddingStore;

#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Entries last accessed longer ago than this are deleted.
    pub before: chrono::Duration,
    pub start_id: i64,
    /// Exclusive; defaults to `max_id() + 1` so the newest row is in range.
    pub end_id: Option<i64>,
    pub batch_size: i64,
    pub sleep: Duration,
}

/// Run one garbage collection pass. Returns the number of rows deleted.
pub async fn run(store: &dyn EmbeddingStore, options: GcOptions) -> Result<u64> {
    let threshold = Utc::now() - options.before;
    let end_id = match options.end_id {
        Some(id) => id,
        None => store.max_id().await? + 1,
    };

    let deleted = store
        .delete_range(
            threshold,
            options.start_id,
            end_id,
            options.batch_size,
            options.sleep,
        )
        .await?;

    tracing::info!(
        deleted_entries = deleted,
        start_id = options.start_id,
        end_id,
        threshold = %threshold,
        "garbage collection completed"
    );
    Ok(deleted)
}

/// Parse a retention duration: `Ns`, `Nm`, `Nh`, or `Nd` (days as `N×24h`).
pub fn parse_before(value: &str) -> Result<chrono::Duration> {
    let (number, unit) = value.split_at(value.len().saturating_sub(1));
    let count: i64 = number
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration: {value:?}")))?;
    if count < 0 {
        return Err(Error::Config(format!("invalid duration: {value:?}")));
    }

    match unit {
        "s" => Ok(chrono::Duration::seconds(count)),
        "m" => Ok(chrono::Duration::minutes(count)),
        "h" => Ok(chrono::Duration::hours(count)),
        "d" => Ok(chrono::Duration::hours(count * 24)),
        _ => Err(Error::Config(format!(
            "invalid duration unit in {value:?}: expected s, m, h, or d"
        ))),
    }
}

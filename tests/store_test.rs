//! Store-level tests: upsert semantics, access-time bumping, and the ranged,
//! batched garbage collection procedure.

use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use cachembed::gc::{self, GcOptions};
use cachembed::store::{self, EmbeddingStore, SqliteStore};

struct TestDb {
    _temp: TempDir,
    path: String,
}

fn scratch_db() -> TestDb {
    let temp = TempDir::new().unwrap();
    let path = temp
        .path()
        .join("cache.db")
        .to_str()
        .unwrap()
        .to_string();
    TestDb { _temp: temp, path }
}

/// Insert `count` rows with distinct hashes; row ids are 1-based and
/// sequential on a fresh database.
async fn seed_rows(store: &dyn EmbeddingStore, count: usize) {
    for i in 0..count {
        store
            .put(&format!("hash-{i:02}"), "text-embedding-3-small", 0, "AAAAPg==")
            .await
            .unwrap();
    }
}

/// Rewrite `last_accessed_at` for rows with `id <= max_id` through a second
/// connection, as if they had not been touched for `hours_ago` hours.
fn backdate(path: &str, max_id: i64, hours_ago: i64) {
    let conn = rusqlite::Connection::open(path).unwrap();
    let stale = Utc::now() - chrono::Duration::hours(hours_ago);
    conn.execute(
        "UPDATE embeddings SET last_accessed_at = ?1 WHERE id <= ?2",
        rusqlite::params![stale, max_id],
    )
    .unwrap();
}

fn remaining_ids(path: &str) -> Vec<i64> {
    let conn = rusqlite::Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT id FROM embeddings ORDER BY id")
        .unwrap();
    let ids = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<i64>, _>>()
        .unwrap();
    ids
}

#[tokio::test]
async fn delete_range_respects_id_bounds_and_threshold() {
    let db = scratch_db();
    let store = store::open(&db.path).await.unwrap();
    seed_rows(store.as_ref(), 10).await;

    // Rows 1-5 look an hour old; rows 6-10 are fresh.
    backdate(&db.path, 5, 1);

    let threshold = Utc::now() - chrono::Duration::minutes(30);
    let deleted = store
        .delete_range(threshold, 1, 4, 1000, Duration::ZERO)
        .await
        .unwrap();

    // Only rows 1-3: row 4 is old but outside [1, 4); rows 6+ are fresh.
    assert_eq!(deleted, 3);
    assert_eq!(remaining_ids(&db.path), vec![4, 5, 6, 7, 8, 9, 10]);
}

#[tokio::test]
async fn delete_range_is_restartable() {
    let db = scratch_db();
    let store = store::open(&db.path).await.unwrap();
    seed_rows(store.as_ref(), 6).await;
    backdate(&db.path, 6, 2);

    let threshold = Utc::now() - chrono::Duration::hours(1);
    let first = store
        .delete_range(threshold, 1, 7, 2, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(first, 6);

    // Replaying the same range deletes nothing.
    let second = store
        .delete_range(threshold, 1, 7, 2, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(second, 0);
    assert!(remaining_ids(&db.path).is_empty());
}

#[tokio::test]
async fn delete_range_spares_recently_accessed_rows() {
    let db = scratch_db();
    let store = store::open(&db.path).await.unwrap();
    seed_rows(store.as_ref(), 4).await;
    backdate(&db.path, 4, 2);

    // Touching a stale row through a lookup rescues it.
    store
        .get("hash-01", "text-embedding-3-small", 0)
        .await
        .unwrap()
        .unwrap();

    let threshold = Utc::now() - chrono::Duration::hours(1);
    let deleted = store
        .delete_range(threshold, 1, 5, 1000, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(deleted, 3);
    assert_eq!(remaining_ids(&db.path), vec![2]);
}

#[tokio::test]
async fn gc_defaults_end_id_to_max_plus_one() {
    let db = scratch_db();
    let store = store::open(&db.path).await.unwrap();
    seed_rows(store.as_ref(), 5).await;
    backdate(&db.path, 5, 2);

    let deleted = gc::run(
        store.as_ref(),
        GcOptions {
            before: gc::parse_before("1h").unwrap(),
            start_id: 0,
            end_id: None,
            batch_size: 2,
            sleep: Duration::ZERO,
        },
    )
    .await
    .unwrap();

    // The highest row id is inside the scanned range.
    assert_eq!(deleted, 5);
    assert!(remaining_ids(&db.path).is_empty());
}

#[tokio::test]
async fn gc_on_an_empty_table_deletes_nothing() {
    let db = scratch_db();
    let store = store::open(&db.path).await.unwrap();

    let deleted = gc::run(
        store.as_ref(),
        GcOptions {
            before: gc::parse_before("24h").unwrap(),
            start_id: 0,
            end_id: None,
            batch_size: 1000,
            sleep: Duration::ZERO,
        },
    )
    .await
    .unwrap();
    assert_eq!(deleted, 0);
}

#[tokio::test]
async fn ids_are_not_reused_after_deletion() {
    let db = scratch_db();
    let store = store::open(&db.path).await.unwrap();
    seed_rows(store.as_ref(), 3).await;
    backdate(&db.path, 3, 2);

    let threshold = Utc::now() - chrono::Duration::hours(1);
    store
        .delete_range(threshold, 1, 4, 1000, Duration::ZERO)
        .await
        .unwrap();

    store
        .put("hash-new", "text-embedding-3-small", 0, "AAAAPg==")
        .await
        .unwrap();
    assert_eq!(remaining_ids(&db.path), vec![4]);
}

#[tokio::test]
async fn open_accepts_in_memory_dsn() {
    let store = store::open(":memory:").await.unwrap();
    assert_eq!(store.max_id().await.unwrap(), 0);
}

#[tokio::test]
async fn reopen_preserves_entries() {
    let db = scratch_db();
    {
        let store = store::open(&db.path).await.unwrap();
        store
            .put("persist", "text-embedding-3-small", 0, "AAAAPg==")
            .await
            .unwrap();
    }

    let store = SqliteStore::open(&db.path).unwrap();
    let entry = store
        .get("persist", "text-embedding-3-small", 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.content, "AAAAPg==");
}

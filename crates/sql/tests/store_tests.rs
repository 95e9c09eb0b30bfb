//! Store-level behavior: as-of reads, index resolution, batch
//! atomicity, and schema bootstrap.

use chronostore_core::{
    DocumentLogEntry, IndexEntry, Interval, Order, StoreError, Timestamp, TimestampRange,
    WriteBatch, GLOBAL_SCHEMA_VERSION,
};
use chronostore_sql::{SqliteStore, StoreConfig};
use std::sync::Arc;
use tempfile::TempDir;

async fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteStore::open(dir.path().join("store.db"), StoreConfig::default())
        .await
        .expect("open store");
    (dir, store)
}

fn issue_doc(ts: i64, id: &str, status: &str) -> DocumentLogEntry {
    DocumentLogEntry::new(
        Timestamp(ts),
        "issues",
        id,
        format!(r#"{{"status":"{status}"}}"#),
    )
}

fn status_entry(ts: i64, status: &str, id: &str) -> IndexEntry {
    let mut key = status.as_bytes().to_vec();
    key.push(0x00);
    key.extend_from_slice(id.as_bytes());
    IndexEntry::new("issues_by_status", Timestamp(ts), key, "issues", id)
}

#[tokio::test]
async fn create_update_delete_as_of_reads() {
    let (_dir, store) = open_store().await;
    let reader = store.reader();

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    store.write(&batch).await.unwrap();

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(200, "bd-1", "closed").with_prev_ts(Timestamp(100)));
    store.write(&batch).await.unwrap();

    let mut batch = WriteBatch::new();
    batch.add_document(DocumentLogEntry::tombstone(
        Timestamp(300),
        "issues",
        "bd-1",
        Some(Timestamp(200)),
    ));
    store.write(&batch).await.unwrap();

    let at_150 = reader
        .get_document("issues", "bd-1", Some(Timestamp(150)))
        .await
        .unwrap()
        .expect("visible at 150");
    assert!(at_150.value.as_deref().unwrap().contains("open"));
    assert_eq!(at_150.ts, Timestamp(100));

    let at_250 = reader
        .get_document("issues", "bd-1", Some(Timestamp(250)))
        .await
        .unwrap()
        .expect("visible at 250");
    assert!(at_250.value.as_deref().unwrap().contains("closed"));
    assert_eq!(at_250.prev_ts, Some(Timestamp(100)));

    let at_350 = reader
        .get_document("issues", "bd-1", Some(Timestamp(350)))
        .await
        .unwrap();
    assert!(at_350.is_none());

    // Without a cutoff the tombstone is the latest version.
    assert!(reader
        .get_document("issues", "bd-1", None)
        .await
        .unwrap()
        .is_none());

    // Before the first version nothing exists.
    assert!(reader
        .get_document("issues", "bd-1", Some(Timestamp(99)))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn write_at_ts_reads_back_at_that_ts() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    store.write(&batch).await.unwrap();

    let doc = store
        .reader()
        .get_document("issues", "bd-1", Some(Timestamp(100)))
        .await
        .unwrap()
        .expect("visible at its own ts");
    assert_eq!(doc.ts, Timestamp(100));

    // A tombstone at T hides the document at T but not at T-1.
    let mut batch = WriteBatch::new();
    batch.add_document(DocumentLogEntry::tombstone(
        Timestamp(200),
        "issues",
        "bd-1",
        Some(Timestamp(100)),
    ));
    store.write(&batch).await.unwrap();
    let reader = store.reader();
    assert!(reader
        .get_document("issues", "bd-1", Some(Timestamp(200)))
        .await
        .unwrap()
        .is_none());
    assert!(reader
        .get_document("issues", "bd-1", Some(Timestamp(199)))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn rewriting_identical_content_leaves_older_reads_unchanged() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    store.write(&batch).await.unwrap();

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(200, "bd-1", "open").with_prev_ts(Timestamp(100)));
    store.write(&batch).await.unwrap();

    let at_150 = store
        .reader()
        .get_document("issues", "bd-1", Some(Timestamp(150)))
        .await
        .unwrap()
        .expect("older read unchanged");
    assert_eq!(at_150.ts, Timestamp(100));
}

#[tokio::test]
async fn get_documents_omits_missing_and_deleted_ids() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    batch.add_document(issue_doc(100, "bd-2", "open"));
    batch.add_document(DocumentLogEntry::tombstone(
        Timestamp(100),
        "issues",
        "bd-3",
        None,
    ));
    store.write(&batch).await.unwrap();

    let ids: Vec<String> = ["bd-1", "bd-2", "bd-3", "bd-4"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let found = store
        .reader()
        .get_documents("issues", &ids, None)
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.contains_key("bd-1"));
    assert!(found.contains_key("bd-2"));
    assert!(!found.contains_key("bd-3"));
    assert!(!found.contains_key("bd-4"));
}

#[tokio::test]
async fn load_documents_returns_raw_history_in_range() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    batch.add_document(issue_doc(200, "bd-1", "closed"));
    batch.add_document(DocumentLogEntry::tombstone(
        Timestamp(300),
        "issues",
        "bd-1",
        Some(Timestamp(200)),
    ));
    store.write(&batch).await.unwrap();

    let reader = store.reader();
    let all = reader
        .load_documents("issues", TimestampRange::all_time(), Order::Asc)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    // History is strictly increasing in ts for a given id.
    assert!(all.windows(2).all(|w| w[0].ts < w[1].ts));
    assert!(all[2].is_deleted());

    let windowed = reader
        .load_documents(
            "issues",
            TimestampRange {
                start: Timestamp(150),
                end: Timestamp(300),
            },
            Order::Desc,
        )
        .await
        .unwrap();
    assert_eq!(windowed.len(), 2);
    assert_eq!(windowed[0].ts, Timestamp(300));
    assert_eq!(windowed[1].ts, Timestamp(200));
}

#[tokio::test]
async fn index_scan_after_update_honors_tombstones() {
    let (_dir, store) = open_store().await;

    // ts=100: issue is open.
    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    batch.add_index(status_entry(100, "open", "bd-1"));
    store.write(&batch).await.unwrap();

    // ts=200: issue closes; the stale key is retired.
    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(200, "bd-1", "closed").with_prev_ts(Timestamp(100)));
    batch.add_index(status_entry(200, "closed", "bd-1"));
    batch.add_index(status_entry(200, "open", "bd-1").retire(Timestamp(200)));
    store.write(&batch).await.unwrap();

    let reader = store.reader();
    let open_interval = Interval::prefix(b"open\x00");
    let closed_interval = Interval::prefix(b"closed\x00");

    // As of 250 the open key is gone and the closed key resolves.
    let hits = reader
        .index_scan("issues_by_status", &open_interval, Timestamp(250), Order::Asc, 10)
        .await
        .unwrap();
    assert!(hits.is_empty());

    let hits = reader
        .index_scan(
            "issues_by_status",
            &closed_interval,
            Timestamp(250),
            Order::Asc,
            10,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].key.starts_with(b"closed\x00"));
    assert!(hits[0].document.value.as_deref().unwrap().contains("closed"));
    assert_eq!(hits[0].document.ts, Timestamp(200));

    // As of 150 the pre-update view still holds.
    let hits = reader
        .index_scan("issues_by_status", &open_interval, Timestamp(150), Order::Asc, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.ts, Timestamp(100));
    assert!(reader
        .index_scan(
            "issues_by_status",
            &closed_interval,
            Timestamp(150),
            Order::Asc,
            10
        )
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn index_scan_orders_and_limits_by_key() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    for (id, status) in [("bd-1", "open"), ("bd-2", "open"), ("bd-3", "open")] {
        batch.add_document(issue_doc(100, id, status));
        batch.add_index(status_entry(100, status, id));
    }
    store.write(&batch).await.unwrap();

    let reader = store.reader();
    let interval = Interval::prefix(b"open\x00");

    let asc = reader
        .index_scan("issues_by_status", &interval, Timestamp(100), Order::Asc, 10)
        .await
        .unwrap();
    let ids: Vec<&str> = asc.iter().map(|hit| hit.document.id.as_str()).collect();
    assert_eq!(ids, vec!["bd-1", "bd-2", "bd-3"]);

    let desc = reader
        .index_scan("issues_by_status", &interval, Timestamp(100), Order::Desc, 2)
        .await
        .unwrap();
    let ids: Vec<&str> = desc.iter().map(|hit| hit.document.id.as_str()).collect();
    assert_eq!(ids, vec!["bd-3", "bd-2"]);
}

#[tokio::test]
async fn index_scan_drops_keys_whose_document_is_gone() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    batch.add_index(status_entry(100, "open", "bd-1"));
    store.write(&batch).await.unwrap();

    // The document is tombstoned but the index entry is left behind.
    let mut batch = WriteBatch::new();
    batch.add_document(DocumentLogEntry::tombstone(
        Timestamp(200),
        "issues",
        "bd-1",
        Some(Timestamp(100)),
    ));
    store.write(&batch).await.unwrap();

    let hits = store
        .reader()
        .index_scan(
            "issues_by_status",
            &Interval::prefix(b"open\x00"),
            Timestamp(250),
            Order::Asc,
            10,
        )
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn index_get_resolves_exact_keys_only() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    batch.add_index(status_entry(100, "open", "bd-1"));
    store.write(&batch).await.unwrap();

    let reader = store.reader();
    let doc = reader
        .index_get("issues_by_status", b"open\x00bd-1", Timestamp(150))
        .await
        .unwrap()
        .expect("exact key resolves");
    assert_eq!(doc.id, "bd-1");

    assert!(reader
        .index_get("issues_by_status", b"open\x00", Timestamp(150))
        .await
        .unwrap()
        .is_none());
    assert!(reader
        .index_get("issues_by_status", b"open\x00bd-1", Timestamp(99))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn duplicate_key_fails_the_whole_batch() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    store.write(&batch).await.unwrap();

    // Five valid rows plus one duplicate of the existing primary key;
    // the duplicate sits last so the valid inserts must roll back.
    let mut batch = WriteBatch::new();
    for i in 2i64..=6 {
        batch.add_document(issue_doc(100 + i, &format!("bd-{i}"), "open"));
    }
    batch.add_document(issue_doc(100, "bd-1", "open"));

    let err = store.write(&batch).await.unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)), "{err}");

    let reader = store.reader();
    let all = reader
        .load_documents("issues", TimestampRange::all_time(), Order::Asc)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    for i in 2..=6 {
        assert!(reader
            .get_document("issues", &format!("bd-{i}"), None)
            .await
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let (_dir, store) = open_store().await;
    store.write(&WriteBatch::new()).await.unwrap();
    assert_eq!(
        store.reader().max_timestamp().await.unwrap(),
        Timestamp::ZERO
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_commit_disjoint_batches() {
    let (_dir, store) = open_store().await;
    let store = Arc::new(store);

    let spawn_writer = |store: Arc<SqliteStore>, base: i64, prefix: &'static str| {
        tokio::spawn(async move {
            let mut batch = WriteBatch::new();
            for i in 0..1000 {
                batch.add_document(issue_doc(base + i, &format!("{prefix}-{i}"), "open"));
            }
            store.write(&batch).await
        })
    };

    let a = spawn_writer(store.clone(), 1, "a");
    let b = spawn_writer(store.clone(), 100_001, "b");
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let reader = store.reader();
    assert_eq!(reader.max_timestamp().await.unwrap(), Timestamp(101_000));
    let all = reader
        .load_documents("issues", TimestampRange::all_time(), Order::Asc)
        .await
        .unwrap();
    assert_eq!(all.len(), 2000);
}

#[tokio::test]
async fn fresh_flag_and_globals_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("store.db");

    let store = SqliteStore::open(&path, StoreConfig::default()).await.unwrap();
    assert!(store.is_fresh());
    assert_eq!(store.path(), path);

    store.write_global("greeting", r#""hello""#).await.unwrap();
    assert_eq!(
        store.get_global("greeting").await.unwrap().as_deref(),
        Some(r#""hello""#)
    );
    store.write_global("greeting", r#""bye""#).await.unwrap();
    assert_eq!(
        store.get_global("greeting").await.unwrap().as_deref(),
        Some(r#""bye""#)
    );
    assert!(store.get_global("absent").await.unwrap().is_none());

    store.write_watermark(Timestamp(42)).await.unwrap();
    assert_eq!(store.read_watermark().await.unwrap(), Some(Timestamp(42)));
    store.close().await;

    let reopened = SqliteStore::open(&path, StoreConfig::default()).await.unwrap();
    assert!(!reopened.is_fresh());
    assert_eq!(
        reopened.get_global("greeting").await.unwrap().as_deref(),
        Some(r#""bye""#)
    );
    reopened.close().await;
}

#[tokio::test]
async fn schema_mismatch_aborts_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");

    let store = SqliteStore::open(&path, StoreConfig::default()).await.unwrap();
    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    store.write(&batch).await.unwrap();
    // Pretend a newer build stamped the store.
    store.write_global(GLOBAL_SCHEMA_VERSION, "2").await.unwrap();
    store.close().await;

    let err = SqliteStore::open(&path, StoreConfig::default())
        .await
        .err()
        .expect("open must fail");
    assert!(
        matches!(
            err,
            StoreError::SchemaMismatch {
                expected: 1,
                found: 2
            }
        ),
        "{err}"
    );

    // A failed open writes nothing, so a second attempt fails the same way.
    assert!(SqliteStore::open(&path, StoreConfig::default()).await.is_err());
}

#[tokio::test]
async fn document_count_is_approximate_per_table() {
    let (_dir, store) = open_store().await;

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    batch.add_document(issue_doc(100, "bd-2", "open"));
    batch.add_document(issue_doc(100, "c-1", "open"));
    store.write(&batch).await.unwrap();

    let mut batch = WriteBatch::new();
    batch.add_document(DocumentLogEntry::tombstone(
        Timestamp(200),
        "issues",
        "bd-2",
        Some(Timestamp(100)),
    ));
    store.write(&batch).await.unwrap();

    let reader = store.reader();
    // Counting is MVCC-approximate: bd-2's historical live row still counts.
    assert_eq!(reader.document_count("issues").await.unwrap(), 3);
    assert_eq!(reader.document_count("comments").await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_store_rejects_operations() {
    let (_dir, store) = open_store().await;
    store.cancellation_token().cancel();

    let err = store.reader().max_timestamp().await.unwrap_err();
    assert!(matches!(err, StoreError::Cancelled), "{err}");

    let mut batch = WriteBatch::new();
    batch.add_document(issue_doc(100, "bd-1", "open"));
    let err = store.write(&batch).await.unwrap_err();
    assert!(matches!(err, StoreError::Cancelled), "{err}");
}

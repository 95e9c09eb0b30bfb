//! As-of reads over the document and index logs.

use std::collections::HashMap;
use std::time::Duration;

use chronostore_core::{
    DocumentLogEntry, IndexResult, Interval, Order, StoreResult, Timestamp, TimestampRange,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::store::{engine_err, run_guarded};

/// Resolves an index scan winner to the latest document version visible
/// at the read timestamp, keeping only rows that are live on both logs.
/// The winner per `(index_id, key)` is picked *before* the tombstone
/// check: a retired key must hide older live entries, and a re-created
/// key must win over its own tombstone.
const INDEX_SCAN_QUERY: &str = "\
WITH latest_index AS (
    SELECT key, ts, deleted, table_id, document_id,
           ROW_NUMBER() OVER (PARTITION BY key ORDER BY ts DESC) AS rn
    FROM indexes
    WHERE index_id = ? AND key >= ? AND (? IS NULL OR key < ?) AND ts <= ?
)
SELECT i.key AS index_key, d.id, d.ts, d.table_id, d.json_value, d.deleted, d.prev_ts
FROM latest_index i
JOIN documents d ON d.table_id = i.table_id AND d.id = i.document_id
WHERE i.rn = 1 AND i.deleted = 0 AND d.deleted = 0
  AND d.ts = (
      SELECT MAX(ts) FROM documents
      WHERE table_id = i.table_id AND id = i.document_id AND ts <= ?
  )
ORDER BY i.key {order}
LIMIT ?";

/// Point form of [`INDEX_SCAN_QUERY`] for an exact key.
const INDEX_GET_QUERY: &str = "\
WITH latest_index AS (
    SELECT ts, deleted, table_id, document_id
    FROM indexes
    WHERE index_id = ? AND key = ? AND ts <= ?
    ORDER BY ts DESC
    LIMIT 1
)
SELECT d.id, d.ts, d.table_id, d.json_value, d.deleted, d.prev_ts
FROM latest_index i
JOIN documents d ON d.table_id = i.table_id AND d.id = i.document_id
WHERE i.deleted = 0 AND d.deleted = 0
  AND d.ts = (
      SELECT MAX(ts) FROM documents
      WHERE table_id = i.table_id AND id = i.document_id AND ts <= ?
  )
LIMIT 1";

/// Read handle over the store.
///
/// Cheap to clone; every clone shares the pooled read connections and
/// the store's cancellation token. All reads are point-in-time
/// consistent within a single call.
#[derive(Clone)]
pub struct StoreReader {
    pool: SqlitePool,
    cancel: CancellationToken,
    op_timeout: Duration,
}

impl StoreReader {
    pub(crate) fn new(
        pool: SqlitePool,
        cancel: CancellationToken,
        op_timeout: Duration,
    ) -> StoreReader {
        StoreReader {
            pool,
            cancel,
            op_timeout,
        }
    }

    /// Latest non-deleted version of a document visible at `at_ts`, or
    /// `None` if the document never existed or was deleted by then.
    /// Without `at_ts` the current latest version is returned.
    ///
    /// The latest visible row wins before the tombstone check, so a
    /// delete followed by a re-create reads correctly at every cutoff.
    pub async fn get_document(
        &self,
        table_id: &str,
        id: &str,
        at_ts: Option<Timestamp>,
    ) -> StoreResult<Option<DocumentLogEntry>> {
        run_guarded(&self.cancel, self.op_timeout, async {
            let cutoff = at_ts.unwrap_or(Timestamp::MAX);
            let row = sqlx::query(
                "SELECT id, ts, table_id, json_value, deleted, prev_ts
                 FROM documents
                 WHERE table_id = ? AND id = ? AND ts <= ?
                 ORDER BY ts DESC
                 LIMIT 1",
            )
            .bind(table_id)
            .bind(id)
            .bind(cutoff.as_nanos())
            .fetch_optional(&self.pool)
            .await
            .map_err(engine_err)?;

            match row {
                Some(row) => {
                    let doc = row_to_document(&row)?;
                    Ok((!doc.is_deleted()).then_some(doc))
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// Map form of [`StoreReader::get_document`]. Missing and deleted
    /// ids are omitted, so callers distinguish presence by membership.
    pub async fn get_documents(
        &self,
        table_id: &str,
        ids: &[String],
        at_ts: Option<Timestamp>,
    ) -> StoreResult<HashMap<String, DocumentLogEntry>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get_document(table_id, id, at_ts).await? {
                found.insert(id.clone(), doc);
            }
        }
        Ok(found)
    }

    /// Every version in the table whose `ts` lies in `ts_range`,
    /// tombstones included, ordered by `ts`. This is the raw history
    /// for change feeds and diagnostics, not a latest-view query.
    pub async fn load_documents(
        &self,
        table_id: &str,
        ts_range: TimestampRange,
        order: Order,
    ) -> StoreResult<Vec<DocumentLogEntry>> {
        run_guarded(&self.cancel, self.op_timeout, async {
            let query = format!(
                "SELECT id, ts, table_id, json_value, deleted, prev_ts
                 FROM documents
                 WHERE table_id = ? AND ts >= ? AND ts <= ?
                 ORDER BY ts {}",
                order.as_sql()
            );
            let rows = sqlx::query(&query)
                .bind(table_id)
                .bind(ts_range.start.as_nanos())
                .bind(ts_range.end.as_nanos())
                .fetch_all(&self.pool)
                .await
                .map_err(engine_err)?;
            rows.iter().map(row_to_document).collect()
        })
        .await
    }

    /// Scans an index within `interval` as of `read_ts`, returning at
    /// most `limit` hits ordered by key. Each hit carries the matched
    /// key and the latest live document it references; keys whose
    /// winning entry is a tombstone, and keys whose document is gone at
    /// `read_ts`, are dropped. A zero `read_ts` reads at "now".
    pub async fn index_scan(
        &self,
        index_id: &str,
        interval: &Interval,
        read_ts: Timestamp,
        order: Order,
        limit: i64,
    ) -> StoreResult<Vec<IndexResult>> {
        run_guarded(&self.cancel, self.op_timeout, async {
            let read_ts = effective_read_ts(read_ts);
            trace!(index_id, read_ts = %read_ts, limit, "index scan");
            let query = INDEX_SCAN_QUERY.replace("{order}", order.as_sql());
            let start = interval.start.as_deref().unwrap_or(b"");
            let end = interval.end.as_deref();
            let rows = sqlx::query(&query)
                .bind(index_id)
                .bind(start)
                .bind(end)
                .bind(end)
                .bind(read_ts.as_nanos())
                .bind(read_ts.as_nanos())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(engine_err)?;

            rows.iter()
                .map(|row| {
                    Ok(IndexResult {
                        key: row.try_get("index_key").map_err(engine_err)?,
                        document: row_to_document(row)?,
                    })
                })
                .collect()
        })
        .await
    }

    /// Point lookup: the latest live document referenced by exactly
    /// `key`, or `None`. A zero `read_ts` reads at "now".
    pub async fn index_get(
        &self,
        index_id: &str,
        key: &[u8],
        read_ts: Timestamp,
    ) -> StoreResult<Option<DocumentLogEntry>> {
        run_guarded(&self.cancel, self.op_timeout, async {
            let read_ts = effective_read_ts(read_ts);
            let row = sqlx::query(INDEX_GET_QUERY)
                .bind(index_id)
                .bind(key)
                .bind(read_ts.as_nanos())
                .bind(read_ts.as_nanos())
                .fetch_optional(&self.pool)
                .await
                .map_err(engine_err)?;
            row.as_ref().map(row_to_document).transpose()
        })
        .await
    }

    /// Largest `ts` in the document log, or zero on an empty store.
    pub async fn max_timestamp(&self) -> StoreResult<Timestamp> {
        run_guarded(&self.cancel, self.op_timeout, async {
            let nanos: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(ts), 0) FROM documents")
                .fetch_one(&self.pool)
                .await
                .map_err(engine_err)?;
            Ok(Timestamp::from_nanos(nanos))
        })
        .await
    }

    /// Approximate count of distinct live documents in a table. Counts
    /// ids that ever had a non-tombstone version, so recently deleted
    /// documents may still be included.
    pub async fn document_count(&self, table_id: &str) -> StoreResult<i64> {
        run_guarded(&self.cancel, self.op_timeout, async {
            sqlx::query_scalar(
                "SELECT COUNT(DISTINCT id) FROM documents WHERE table_id = ? AND deleted = 0",
            )
            .bind(table_id)
            .fetch_one(&self.pool)
            .await
            .map_err(engine_err)
        })
        .await
    }
}

fn effective_read_ts(read_ts: Timestamp) -> Timestamp {
    if read_ts == Timestamp::ZERO {
        Timestamp::now()
    } else {
        read_ts
    }
}

fn row_to_document(row: &SqliteRow) -> StoreResult<DocumentLogEntry> {
    Ok(DocumentLogEntry {
        id: row.try_get("id").map_err(engine_err)?,
        ts: Timestamp::from_nanos(row.try_get("ts").map_err(engine_err)?),
        table_id: row.try_get("table_id").map_err(engine_err)?,
        value: row.try_get("json_value").map_err(engine_err)?,
        deleted: row.try_get("deleted").map_err(engine_err)?,
        prev_ts: row
            .try_get::<Option<i64>, _>("prev_ts")
            .map_err(engine_err)?
            .map(Timestamp::from_nanos),
    })
}

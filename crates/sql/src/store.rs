//! The SQLite-backed store: bootstrap, atomic batch writes, and the
//! global KV.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chronostore_core::{
    StoreError, StoreResult, Timestamp, WriteBatch, GLOBAL_MAX_REPEATABLE_TS, GLOBAL_SCHEMA_VERSION,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::reader::StoreReader;
use crate::schema;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Size of the read connection pool. The writer always gets exactly
    /// one connection.
    pub read_connections: u32,
    /// Engine busy timeout.
    pub busy_timeout: Duration,
    /// Deadline applied to every read and write operation.
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_connections: 4,
            busy_timeout: Duration::from_millis(5000),
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// SQLite-backed temporal document store.
///
/// Writers are serialized: the writer pool holds a single connection
/// and commits run under an exclusive lock. Readers go through a
/// separate pool and, thanks to WAL, see a consistent snapshot without
/// blocking on writers.
pub struct SqliteStore {
    path: PathBuf,
    fresh: bool,
    writer: SqlitePool,
    readers: SqlitePool,
    write_lock: Mutex<()>,
    cancel: CancellationToken,
    op_timeout: Duration,
}

impl SqliteStore {
    /// Opens the store at `path`, creating it if missing.
    ///
    /// A fresh store gets the schema and a `schema_version` stamp. An
    /// existing store must carry the expected version; anything else
    /// fails with [`StoreError::SchemaMismatch`] before any write.
    pub async fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<SqliteStore> {
        let path = path.as_ref().to_path_buf();
        let fresh = !path.exists();
        if fresh {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        // SQLite supports one writer at a time; capping the pool keeps
        // engine-level busy errors out of the write path.
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .map_err(engine_err)?;
        let readers = SqlitePoolOptions::new()
            .max_connections(config.read_connections.max(1))
            .connect_with(options)
            .await
            .map_err(engine_err)?;

        if fresh {
            for statement in schema::SCHEMA {
                sqlx::query(statement)
                    .execute(&writer)
                    .await
                    .map_err(engine_err)?;
            }
            let stamp = serde_json::to_string(&schema::SCHEMA_VERSION)?;
            sqlx::query("INSERT OR REPLACE INTO persistence_globals (key, json_value) VALUES (?, ?)")
                .bind(GLOBAL_SCHEMA_VERSION)
                .bind(stamp)
                .execute(&writer)
                .await
                .map_err(engine_err)?;
            debug!(path = %path.display(), version = schema::SCHEMA_VERSION, "initialized fresh store");
        } else {
            let found = read_schema_version(&readers).await?;
            if found != schema::SCHEMA_VERSION {
                writer.close().await;
                readers.close().await;
                return Err(StoreError::SchemaMismatch {
                    expected: schema::SCHEMA_VERSION,
                    found,
                });
            }
        }

        Ok(SqliteStore {
            path,
            fresh,
            writer,
            readers,
            write_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            op_timeout: config.op_timeout,
        })
    }

    /// True if this store was created by this open call. Callers use it
    /// to seed defaults on first run.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token cancelling every in-flight and future operation when fired.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns a cheap read handle; may be cloned and used concurrently.
    pub fn reader(&self) -> StoreReader {
        StoreReader::new(self.readers.clone(), self.cancel.clone(), self.op_timeout)
    }

    /// Atomically commits every row of `batch` in one transaction.
    ///
    /// Either the whole batch becomes durable or none of it does; a
    /// duplicate primary key anywhere in the batch rolls everything
    /// back with [`StoreError::ConstraintViolation`]. An empty batch is
    /// a no-op.
    #[instrument(skip(self, batch), fields(documents = batch.documents.len(), indexes = batch.indexes.len()))]
    pub async fn write(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _exclusive = self.write_lock.lock().await;
        // Dropping the future mid-transaction (cancel or deadline)
        // drops the sqlx transaction, which rolls back.
        run_guarded(&self.cancel, self.op_timeout, async {
            let mut tx = self.writer.begin().await.map_err(engine_err)?;
            for doc in &batch.documents {
                sqlx::query(
                    "INSERT INTO documents (id, ts, table_id, json_value, deleted, prev_ts) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&doc.id)
                .bind(doc.ts.as_nanos())
                .bind(&doc.table_id)
                .bind(doc.value.as_deref())
                .bind(doc.deleted)
                .bind(doc.prev_ts.map(Timestamp::as_nanos))
                .execute(&mut *tx)
                .await
                .map_err(engine_err)?;
            }
            for entry in &batch.indexes {
                sqlx::query(
                    "INSERT INTO indexes (index_id, ts, key, deleted, table_id, document_id) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&entry.index_id)
                .bind(entry.ts.as_nanos())
                .bind(entry.key.as_slice())
                .bind(entry.deleted)
                .bind(&entry.table_id)
                .bind(&entry.document_id)
                .execute(&mut *tx)
                .await
                .map_err(engine_err)?;
            }
            tx.commit().await.map_err(engine_err)?;
            Ok(())
        })
        .await
    }

    /// Upserts a global KV entry; `value` must be JSON text.
    pub async fn write_global(&self, key: &str, value: &str) -> StoreResult<()> {
        let _exclusive = self.write_lock.lock().await;
        run_guarded(&self.cancel, self.op_timeout, async {
            sqlx::query("INSERT OR REPLACE INTO persistence_globals (key, json_value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&self.writer)
                .await
                .map_err(engine_err)?;
            Ok(())
        })
        .await
    }

    /// Reads a global KV entry; `None` if the key was never written.
    pub async fn get_global(&self, key: &str) -> StoreResult<Option<String>> {
        run_guarded(&self.cancel, self.op_timeout, async {
            sqlx::query_scalar("SELECT json_value FROM persistence_globals WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.readers)
                .await
                .map_err(engine_err)
        })
        .await
    }

    /// Advances the advisory watermark bounding safely-readable
    /// timestamps. Core reads never consult it.
    pub async fn write_watermark(&self, ts: Timestamp) -> StoreResult<()> {
        let value = serde_json::to_string(&ts)?;
        self.write_global(GLOBAL_MAX_REPEATABLE_TS, &value).await
    }

    /// Reads the advisory watermark, if one was ever written.
    pub async fn read_watermark(&self) -> StoreResult<Option<Timestamp>> {
        match self.get_global(GLOBAL_MAX_REPEATABLE_TS).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Cancels in-flight operations and closes both connection pools.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.writer.close().await;
        self.readers.close().await;
    }
}

async fn read_schema_version(pool: &SqlitePool) -> StoreResult<i32> {
    let raw: Option<String> =
        match sqlx::query_scalar("SELECT json_value FROM persistence_globals WHERE key = ?")
            .bind(GLOBAL_SCHEMA_VERSION)
            .fetch_optional(pool)
            .await
        {
            Ok(raw) => raw,
            // A pre-schema database file reads as version 0.
            Err(sqlx::Error::Database(db)) if db.message().contains("no such table") => None,
            Err(err) => return Err(engine_err(err)),
        };
    match raw {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(0),
    }
}

/// Races `fut` against the store's cancellation token and the operation
/// deadline. Losing the race drops the future, rolling back any open
/// transaction.
pub(crate) async fn run_guarded<T, F>(
    cancel: &CancellationToken,
    op_timeout: Duration,
    fut: F,
) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        outcome = tokio::time::timeout(op_timeout, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(op_timeout.as_millis() as u64)),
        },
    }
}

/// Maps engine errors onto the store taxonomy. Unique-key violations
/// become [`StoreError::ConstraintViolation`]; busy/locked becomes
/// [`StoreError::Conflict`], which callers may retry.
pub(crate) fn engine_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                StoreError::ConstraintViolation(db.message().to_string())
            } else if matches!(db.code().as_deref(), Some("5") | Some("6") | Some("261") | Some("262")) {
                // SQLITE_BUSY / SQLITE_LOCKED and their extended codes.
                StoreError::Conflict(db.message().to_string())
            } else {
                StoreError::Engine(db.to_string())
            }
        }
        sqlx::Error::Io(io) => StoreError::Io(io),
        sqlx::Error::PoolTimedOut => StoreError::Conflict("connection pool timed out".to_string()),
        other => StoreError::Engine(other.to_string()),
    }
}

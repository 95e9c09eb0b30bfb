//! SQLite schema for the document and index logs.

/// Current schema version, stamped into the global KV on a fresh store.
/// Bump on any schema change.
pub const SCHEMA_VERSION: i32 = 1;

/// DDL statements, executed in order on a fresh store.
///
/// Three tables replace a conventional many-table relational layout:
/// every document version is one `documents` row, every derived index
/// entry one `indexes` row, and store-wide metadata lives in
/// `persistence_globals`. Both logs are append-only; updates write new
/// rows and deletions write tombstones.
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS documents (
        id         TEXT    NOT NULL,
        ts         INTEGER NOT NULL,
        table_id   TEXT    NOT NULL,
        json_value TEXT,
        deleted    INTEGER NOT NULL DEFAULT 0,
        prev_ts    INTEGER,
        PRIMARY KEY (ts, table_id, id)
    )"#,
    // Latest-version lookups per document.
    r#"CREATE INDEX IF NOT EXISTS idx_documents_by_id
       ON documents(table_id, id, ts DESC)"#,
    // Change-feed style scans.
    r#"CREATE INDEX IF NOT EXISTS idx_documents_by_ts
       ON documents(ts)"#,
    // Table scans.
    r#"CREATE INDEX IF NOT EXISTS idx_documents_by_table
       ON documents(table_id, ts DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS indexes (
        index_id    TEXT    NOT NULL,
        ts          INTEGER NOT NULL,
        key         BLOB    NOT NULL,
        deleted     INTEGER NOT NULL DEFAULT 0,
        table_id    TEXT,
        document_id TEXT,
        PRIMARY KEY (index_id, key, ts)
    )"#,
    // Key lookups.
    r#"CREATE INDEX IF NOT EXISTS idx_indexes_by_key
       ON indexes(index_id, key, ts DESC)"#,
    // Entries referencing a given document, for index maintenance.
    r#"CREATE INDEX IF NOT EXISTS idx_indexes_by_doc
       ON indexes(table_id, document_id, ts DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS persistence_globals (
        key        TEXT PRIMARY KEY,
        json_value TEXT NOT NULL
    )"#,
];

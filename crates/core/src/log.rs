//! Entries of the document and index logs, and the write batch that
//! commits them together.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::timestamp::Timestamp;

/// Global KV key holding the schema version stamp.
pub const GLOBAL_SCHEMA_VERSION: &str = "schema_version";

/// Global KV key holding the advisory watermark bounding safely-readable
/// timestamps. Core reads do not consult it.
pub const GLOBAL_MAX_REPEATABLE_TS: &str = "max_repeatable_ts";

/// One version of a document in the append-only log.
///
/// Every write creates a new entry rather than updating in place; a
/// logical delete is a new entry with [`DocumentLogEntry::deleted`] set
/// and no value. `prev_ts` links to the immediately previous version of
/// the same `(table_id, id)` and is advisory: the writer does not
/// validate it, and `prev_ts < ts` keeps the chain acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLogEntry {
    /// Timestamp of this write; primary ordering key of the history.
    pub ts: Timestamp,
    /// Document identifier, unique within its table.
    pub id: String,
    /// Logical table this document belongs to (e.g. `issues`).
    pub table_id: String,
    /// Document content as a JSON string; `None` iff this is a tombstone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Tombstone flag.
    pub deleted: bool,
    /// Timestamp of the previous version, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_ts: Option<Timestamp>,
}

impl DocumentLogEntry {
    /// Creates a live document version.
    pub fn new(
        ts: Timestamp,
        table_id: impl Into<String>,
        id: impl Into<String>,
        value: impl Into<String>,
    ) -> DocumentLogEntry {
        DocumentLogEntry {
            ts,
            id: id.into(),
            table_id: table_id.into(),
            value: Some(value.into()),
            deleted: false,
            prev_ts: None,
        }
    }

    /// Creates a deletion tombstone.
    pub fn tombstone(
        ts: Timestamp,
        table_id: impl Into<String>,
        id: impl Into<String>,
        prev_ts: Option<Timestamp>,
    ) -> DocumentLogEntry {
        DocumentLogEntry {
            ts,
            id: id.into(),
            table_id: table_id.into(),
            value: None,
            deleted: true,
            prev_ts,
        }
    }

    /// Links this version to its predecessor.
    pub fn with_prev_ts(mut self, prev_ts: Timestamp) -> DocumentLogEntry {
        self.prev_ts = Some(prev_ts);
        self
    }

    /// True if this entry represents a deletion. A missing value counts
    /// as deleted even if the flag was not set.
    pub fn is_deleted(&self) -> bool {
        self.deleted || self.value.is_none()
    }

    /// Deserializes the JSON value into a domain entity.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let value = self.value.as_deref().unwrap_or("null");
        Ok(serde_json::from_str(value)?)
    }
}

/// One entry of the append-only secondary-index log.
///
/// Entries are derived from documents by the [`crate::IndexGenerator`]
/// and are never mutated; a newer entry for the same `(index_id, key)`
/// supersedes an older one at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Index this entry belongs to (e.g. `issues_by_status`).
    pub index_id: String,
    /// Timestamp this entry was written.
    pub ts: Timestamp,
    /// Sort-ordered key bytes.
    pub key: Vec<u8>,
    /// Tombstone flag; a deleted entry retires its key.
    pub deleted: bool,
    /// Table of the referenced document.
    pub table_id: String,
    /// Id of the referenced document.
    pub document_id: String,
}

impl IndexEntry {
    /// Creates a live index entry.
    pub fn new(
        index_id: impl Into<String>,
        ts: Timestamp,
        key: Vec<u8>,
        table_id: impl Into<String>,
        document_id: impl Into<String>,
    ) -> IndexEntry {
        IndexEntry {
            index_id: index_id.into(),
            ts,
            key,
            deleted: false,
            table_id: table_id.into(),
            document_id: document_id.into(),
        }
    }

    /// Creates a tombstone retiring this entry's key.
    pub fn retire(mut self, ts: Timestamp) -> IndexEntry {
        self.ts = ts;
        self.deleted = true;
        self
    }
}

/// Sort order for scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// A single hit from an index scan: the matched key and the latest live
/// document it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResult {
    /// The index key that matched.
    pub key: Vec<u8>,
    /// The resolved document version.
    pub document: DocumentLogEntry,
}

/// An ordered collection of document versions and index entries
/// committed atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Document versions to append.
    pub documents: Vec<DocumentLogEntry>,
    /// Index entries to append.
    pub indexes: Vec<IndexEntry>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> WriteBatch {
        WriteBatch::default()
    }

    /// Appends a document version.
    pub fn add_document(&mut self, doc: DocumentLogEntry) {
        self.documents.push(doc);
    }

    /// Appends an index entry.
    pub fn add_index(&mut self, entry: IndexEntry) {
        self.indexes.push(entry);
    }

    /// Appends several index entries.
    pub fn add_indexes(&mut self, entries: impl IntoIterator<Item = IndexEntry>) {
        self.indexes.extend(entries);
    }

    /// Resets the batch for reuse.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.indexes.clear();
    }

    /// Total number of rows in the batch.
    pub fn len(&self) -> usize {
        self.documents.len() + self.indexes.len()
    }

    /// True if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.indexes.is_empty()
    }
}

//! Error taxonomy of the store.
//!
//! Point-read misses are expressed as `Option::None`, never as an
//! error. Scans that fail mid-way surface the error and discard the
//! rows collected so far.

use thiserror::Error;

/// Result alias used throughout the store.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Duplicate `(ts, table_id, id)` or `(index_id, key, ts)`;
    /// typically a clock or writer bug.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The on-disk schema version differs from what this build expects.
    /// Fatal; the store must not be opened.
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        /// Version this build expects.
        expected: i32,
        /// Version found in the store (0 if absent).
        found: i32,
    },

    /// JSON serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine-level busy or serialization conflict; retrying with a
    /// fresh batch is acceptable.
    #[error("engine conflict: {0}")]
    Conflict(String),

    /// The operation's cancellation token fired; any in-flight
    /// transaction was rolled back.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation deadline expired before the commit (writes) or the
    /// final row (reads). Nothing partial became visible.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// Underlying storage failure; fatal for the connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Residual engine error not covered by a more specific kind.
    #[error("engine error: {0}")]
    Engine(String),
}

//! chronostore-core
//!
//! Domain layer of the chronostore temporal document store: timestamps,
//! byte-key intervals, document/index log entries, domain entities, and
//! the secondary-index generator. No I/O lives here; the persistence
//! layer is `chronostore-sql`.

#![warn(missing_docs)]

pub mod entity;
pub mod error;
pub mod index;
pub mod interval;
pub mod log;
pub mod timestamp;

pub use entity::{Comment, Dependency, DependencyKind, Issue, IssueFilter, IssueType, Status};
pub use error::{StoreError, StoreResult};
pub use index::IndexGenerator;
pub use interval::Interval;
pub use log::{
    DocumentLogEntry, IndexEntry, IndexResult, Order, WriteBatch, GLOBAL_MAX_REPEATABLE_TS,
    GLOBAL_SCHEMA_VERSION,
};
pub use timestamp::{Timestamp, TimestampRange};

//! chronostore-sql
//!
//! SQLite-backed persistence for the chronostore temporal document
//! store: append-only document and index logs with as-of reads, an
//! atomic batch writer, a small global KV, and the issue-level storage
//! adapter built on top.

#![warn(missing_docs)]

pub mod adapter;
pub mod reader;
pub mod schema;
pub mod store;

pub use adapter::{IssueStats, IssueStore};
pub use reader::StoreReader;
pub use store::{SqliteStore, StoreConfig};

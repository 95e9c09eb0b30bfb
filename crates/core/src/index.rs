//! Secondary-index entry generation.
//!
//! The generator is a pure function from entity to index entries; it
//! holds no state and never touches storage. Index maintenance works by
//! always writing fresh entries at the current timestamp: the as-of
//! read keeps only the latest entry per `(index_id, key)`, so older
//! entries are shadowed. Keys a document no longer produces are retired
//! explicitly with tombstones (see [`IndexGenerator::retired_entries`]).

use std::collections::HashSet;

use crate::entity::{Comment, Dependency, Issue, Status, COMMENTS_TABLE, DEPENDENCIES_TABLE, ISSUES_TABLE};
use crate::log::IndexEntry;
use crate::timestamp::Timestamp;

/// Issues by workflow status.
pub const ISSUES_BY_STATUS: &str = "issues_by_status";
/// Issues by priority.
pub const ISSUES_BY_PRIORITY: &str = "issues_by_priority";
/// Issues by kind of work.
pub const ISSUES_BY_TYPE: &str = "issues_by_type";
/// Issues by parent issue.
pub const ISSUES_BY_PARENT: &str = "issues_by_parent";
/// Issues by assignee.
pub const ISSUES_BY_ASSIGNEE: &str = "issues_by_assignee";
/// Issues by label; one entry per label.
pub const ISSUES_BY_LABEL: &str = "issues_by_label";
/// Dependency edges by dependent issue.
pub const DEPENDENCIES_BY_ISSUE: &str = "dependencies_by_issue";
/// Dependency edges by depended-upon issue.
pub const DEPENDENCIES_BY_DEPENDS_ON: &str = "dependencies_by_depends_on";
/// Comments by issue.
pub const COMMENTS_BY_ISSUE: &str = "comments_by_issue";

/// Encodes a text field component: UTF-8 bytes followed by a `0x00`
/// sentinel. The sentinel delimits the component from the document id
/// appended after it, so `prefix(component)` matches exactly this value
/// and not values it is a prefix of.
pub fn text_component(value: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(value.len() + 1);
    key.extend_from_slice(value.as_bytes());
    key.push(0x00);
    key
}

/// Encodes a small integer component: 2 bytes big-endian followed by
/// the `0x00` sentinel. Big-endian keeps byte-lex order equal to
/// numeric order.
pub fn int_component(value: u16) -> Vec<u8> {
    let mut key = Vec::with_capacity(3);
    key.extend_from_slice(&value.to_be_bytes());
    key.push(0x00);
    key
}

/// Full index key: field component plus the document id. The suffix
/// keeps keys unique per document, so documents sharing a field value
/// do not shadow each other in the latest-entry-per-key resolution.
fn document_key(mut component: Vec<u8>, document_id: &str) -> Vec<u8> {
    component.extend_from_slice(document_id.as_bytes());
    component
}

/// Generates the index entries a domain entity should have.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexGenerator;

impl IndexGenerator {
    /// Creates a generator.
    pub fn new() -> IndexGenerator {
        IndexGenerator
    }

    /// Index entries for an issue at write time `ts`.
    pub fn issue_entries(&self, issue: &Issue, ts: Timestamp) -> Vec<IndexEntry> {
        let mut entries = vec![
            self.issue_entry(ISSUES_BY_STATUS, self.status_key(issue.status, &issue.id), ts, issue),
            self.issue_entry(
                ISSUES_BY_PRIORITY,
                document_key(int_component(issue.priority), &issue.id),
                ts,
                issue,
            ),
            self.issue_entry(
                ISSUES_BY_TYPE,
                document_key(text_component(issue.issue_type.as_str()), &issue.id),
                ts,
                issue,
            ),
        ];
        if let Some(parent) = issue.parent.as_deref().filter(|p| !p.is_empty()) {
            entries.push(self.issue_entry(
                ISSUES_BY_PARENT,
                document_key(text_component(parent), &issue.id),
                ts,
                issue,
            ));
        }
        if let Some(assignee) = issue.assignee.as_deref().filter(|a| !a.is_empty()) {
            entries.push(self.issue_entry(
                ISSUES_BY_ASSIGNEE,
                document_key(text_component(assignee), &issue.id),
                ts,
                issue,
            ));
        }
        for label in &issue.labels {
            entries.push(self.issue_entry(
                ISSUES_BY_LABEL,
                document_key(text_component(label), &issue.id),
                ts,
                issue,
            ));
        }
        entries
    }

    /// Index entries for a dependency edge.
    pub fn dependency_entries(&self, dep: &Dependency, ts: Timestamp) -> Vec<IndexEntry> {
        vec![
            IndexEntry::new(
                DEPENDENCIES_BY_ISSUE,
                ts,
                document_key(text_component(&dep.issue_id), &dep.id),
                DEPENDENCIES_TABLE,
                &dep.id,
            ),
            IndexEntry::new(
                DEPENDENCIES_BY_DEPENDS_ON,
                ts,
                document_key(text_component(&dep.depends_on_id), &dep.id),
                DEPENDENCIES_TABLE,
                &dep.id,
            ),
        ]
    }

    /// Index entries for a comment.
    pub fn comment_entries(&self, comment: &Comment, ts: Timestamp) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            COMMENTS_BY_ISSUE,
            ts,
            document_key(text_component(&comment.issue_id), &comment.id),
            COMMENTS_TABLE,
            &comment.id,
        )]
    }

    /// Key of an issue in the status index; useful for point lookups.
    pub fn status_key(&self, status: Status, issue_id: &str) -> Vec<u8> {
        document_key(text_component(status.as_str()), issue_id)
    }

    /// Tombstones for keys present in `old` but not in `new`, stamped
    /// at `ts`. Applied on every update and delete so stale keys stop
    /// matching scans (tombstone-on-change).
    pub fn retired_entries(
        &self,
        old: &[IndexEntry],
        new: &[IndexEntry],
        ts: Timestamp,
    ) -> Vec<IndexEntry> {
        let kept: HashSet<(&str, &[u8])> = new
            .iter()
            .map(|e| (e.index_id.as_str(), e.key.as_slice()))
            .collect();
        old.iter()
            .filter(|e| !kept.contains(&(e.index_id.as_str(), e.key.as_slice())))
            .map(|e| e.clone().retire(ts))
            .collect()
    }

    fn issue_entry(
        &self,
        index_id: &str,
        key: Vec<u8>,
        ts: Timestamp,
        issue: &Issue,
    ) -> IndexEntry {
        IndexEntry::new(index_id, ts, key, ISSUES_TABLE, &issue.id)
    }
}

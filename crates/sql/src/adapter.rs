//! Issue-level storage adapter over the persistence core.
//!
//! Bridges the tracker's domain model onto the document/index logs:
//! every mutation becomes a write batch pairing new document versions
//! with fresh index entries plus tombstones for keys that no longer
//! apply, committed atomically.

use std::collections::HashMap;

use chronostore_core::entity::{COMMENTS_TABLE, DEPENDENCIES_TABLE, ISSUES_TABLE};
use chronostore_core::index::{
    text_component, COMMENTS_BY_ISSUE, DEPENDENCIES_BY_DEPENDS_ON, DEPENDENCIES_BY_ISSUE,
    ISSUES_BY_STATUS,
};
use chronostore_core::{
    Comment, Dependency, DependencyKind, DocumentLogEntry, IndexGenerator, Interval, Issue,
    IssueFilter, Order, Status, StoreResult, Timestamp, WriteBatch,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::store::SqliteStore;

/// Upper bound used when resolving edges and comments internally.
const RELATED_SCAN_LIMIT: i64 = 4096;

/// Issue counts derived from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueStats {
    /// Approximate number of issues ever created and not yet deleted.
    pub total: i64,
    /// Live issues per status.
    pub by_status: HashMap<Status, usize>,
}

/// Issue-tracking operations over a [`SqliteStore`].
pub struct IssueStore {
    store: SqliteStore,
    indexer: IndexGenerator,
    clock: fn() -> Timestamp,
}

impl IssueStore {
    /// Wraps a store with the default wall clock.
    pub fn new(store: SqliteStore) -> IssueStore {
        IssueStore {
            store,
            indexer: IndexGenerator::new(),
            clock: Timestamp::now,
        }
    }

    /// Replaces the clock; deterministic tests supply their own.
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> IssueStore {
        self.clock = clock;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Closes the underlying store.
    pub async fn close(&self) {
        self.store.close().await;
    }

    /// Creates an issue and its index entries in one commit. Zero
    /// timestamps on the issue are stamped with the write time.
    #[instrument(skip(self, issue), fields(id = %issue.id))]
    pub async fn create_issue(&self, issue: Issue) -> StoreResult<Issue> {
        let mut created = self.create_issues(vec![issue]).await?;
        Ok(created.remove(0))
    }

    /// Creates several issues in a single transaction at one timestamp.
    pub async fn create_issues(&self, issues: Vec<Issue>) -> StoreResult<Vec<Issue>> {
        if issues.is_empty() {
            return Ok(issues);
        }
        let ts = (self.clock)();
        let mut batch = WriteBatch::new();
        let mut stored = Vec::with_capacity(issues.len());
        for mut issue in issues {
            if issue.created_at == Timestamp::ZERO {
                issue.created_at = ts;
            }
            issue.updated_at = ts;
            let value = serde_json::to_string(&issue)?;
            batch.add_document(DocumentLogEntry::new(ts, ISSUES_TABLE, &issue.id, value));
            batch.add_indexes(self.indexer.issue_entries(&issue, ts));
            stored.push(issue);
        }
        self.store.write(&batch).await?;
        debug!(count = stored.len(), ts = %ts, "created issues");
        Ok(stored)
    }

    /// Latest live version of an issue.
    pub async fn get_issue(&self, id: &str) -> StoreResult<Option<Issue>> {
        self.get_issue_at(id, None).await
    }

    /// Issue as it existed at `at_ts`.
    pub async fn get_issue_at(
        &self,
        id: &str,
        at_ts: Option<Timestamp>,
    ) -> StoreResult<Option<Issue>> {
        let reader = self.store.reader();
        match reader.get_document(ISSUES_TABLE, id, at_ts).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Applies `apply` to the current issue and commits the result as a
    /// new version linked via `prev_ts`, together with fresh index
    /// entries and tombstones for keys the update dropped. Returns the
    /// stored issue, or `None` if it does not exist.
    #[instrument(skip(self, apply))]
    pub async fn update_issue(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Issue),
    ) -> StoreResult<Option<Issue>> {
        let ts = (self.clock)();
        self.update_issue_at(id, ts, apply).await
    }

    /// Update path shared with [`IssueStore::close_issue`]; one clock
    /// read per logical write, so timestamps the mutation stamps onto
    /// the issue equal the `ts` of the version that carries them.
    async fn update_issue_at(
        &self,
        id: &str,
        ts: Timestamp,
        apply: impl FnOnce(&mut Issue),
    ) -> StoreResult<Option<Issue>> {
        let reader = self.store.reader();
        let Some(current) = reader.get_document(ISSUES_TABLE, id, None).await? else {
            return Ok(None);
        };
        let mut issue: Issue = current.decode()?;

        let old_entries = self.indexer.issue_entries(&issue, ts);
        apply(&mut issue);
        issue.updated_at = ts;
        let new_entries = self.indexer.issue_entries(&issue, ts);
        let retired = self.indexer.retired_entries(&old_entries, &new_entries, ts);

        let value = serde_json::to_string(&issue)?;
        let mut batch = WriteBatch::new();
        batch.add_document(
            DocumentLogEntry::new(ts, ISSUES_TABLE, id, value).with_prev_ts(current.ts),
        );
        batch.add_indexes(new_entries);
        batch.add_indexes(retired);
        self.store.write(&batch).await?;
        debug!(id, ts = %ts, "updated issue");
        Ok(Some(issue))
    }

    /// Marks an issue closed with a reason. `closed_at` equals the `ts`
    /// of the closing version, so reading back at `closed_at` sees the
    /// closed issue.
    pub async fn close_issue(&self, id: &str, reason: &str) -> StoreResult<Option<Issue>> {
        let ts = (self.clock)();
        self.update_issue_at(id, ts, |issue| {
            issue.status = Status::Closed;
            issue.closed_at = Some(ts);
            issue.close_reason = Some(reason.to_string());
        })
        .await
    }

    /// Tombstones an issue and retires all of its live index keys.
    /// Returns false if the issue does not exist.
    #[instrument(skip(self))]
    pub async fn delete_issue(&self, id: &str) -> StoreResult<bool> {
        let reader = self.store.reader();
        let Some(current) = reader.get_document(ISSUES_TABLE, id, None).await? else {
            return Ok(false);
        };
        let issue: Issue = current.decode()?;

        let ts = (self.clock)();
        let live_entries = self.indexer.issue_entries(&issue, ts);
        let retired = self.indexer.retired_entries(&live_entries, &[], ts);

        let mut batch = WriteBatch::new();
        batch.add_document(DocumentLogEntry::tombstone(
            ts,
            ISSUES_TABLE,
            id,
            Some(current.ts),
        ));
        batch.add_indexes(retired);
        self.store.write(&batch).await?;
        debug!(id, ts = %ts, "deleted issue");
        Ok(true)
    }

    /// Adds a label; no-op if the issue already carries it.
    pub async fn add_label(&self, id: &str, label: &str) -> StoreResult<Option<Issue>> {
        self.update_issue(id, |issue| {
            if !issue.labels.iter().any(|l| l == label) {
                issue.labels.push(label.to_string());
            }
        })
        .await
    }

    /// Removes a label if present.
    pub async fn remove_label(&self, id: &str, label: &str) -> StoreResult<Option<Issue>> {
        self.update_issue(id, |issue| issue.labels.retain(|l| l != label))
            .await
    }

    /// Searches issues matching `filter`, at most `limit` results.
    ///
    /// When a filter field maps onto an index the scan is index-driven
    /// and the remaining fields are checked in memory; otherwise the
    /// table history is folded down to its latest versions.
    pub async fn search_issues(&self, filter: &IssueFilter, limit: i64) -> StoreResult<Vec<Issue>> {
        let reader = self.store.reader();
        let indexed = self.filter_interval(filter);

        let mut issues = match indexed {
            Some((index_id, interval)) => {
                let hits = reader
                    .index_scan(index_id, &interval, Timestamp::ZERO, Order::Asc, limit)
                    .await?;
                let mut issues = Vec::with_capacity(hits.len());
                for hit in hits {
                    issues.push(hit.document.decode::<Issue>()?);
                }
                issues
            }
            None => self.latest_issues().await?,
        };

        issues.retain(|issue| filter.matches(issue));
        issues.truncate(limit.max(0) as usize);
        Ok(issues)
    }

    /// Finds an issue by its external tracker reference.
    pub async fn find_by_external_ref(&self, external_ref: &str) -> StoreResult<Option<Issue>> {
        let issues = self.latest_issues().await?;
        Ok(issues
            .into_iter()
            .find(|issue| issue.external_ref.as_deref() == Some(external_ref)))
    }

    /// Records a dependency edge: `issue_id` depends on `depends_on_id`.
    pub async fn add_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        kind: DependencyKind,
    ) -> StoreResult<Dependency> {
        let ts = (self.clock)();
        let dep = Dependency {
            id: Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            kind,
        };
        let value = serde_json::to_string(&dep)?;
        let mut batch = WriteBatch::new();
        batch.add_document(DocumentLogEntry::new(ts, DEPENDENCIES_TABLE, &dep.id, value));
        batch.add_indexes(self.indexer.dependency_entries(&dep, ts));
        self.store.write(&batch).await?;
        Ok(dep)
    }

    /// Removes the edge between two issues, if recorded. Returns false
    /// when no such edge exists.
    pub async fn remove_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
    ) -> StoreResult<bool> {
        let Some(dep) = self
            .dependencies_for(issue_id)
            .await?
            .into_iter()
            .find(|dep| dep.depends_on_id == depends_on_id)
        else {
            return Ok(false);
        };
        let current = self
            .store
            .reader()
            .get_document(DEPENDENCIES_TABLE, &dep.id, None)
            .await?;

        let ts = (self.clock)();
        let live_entries = self.indexer.dependency_entries(&dep, ts);
        let retired = self.indexer.retired_entries(&live_entries, &[], ts);

        let mut batch = WriteBatch::new();
        batch.add_document(DocumentLogEntry::tombstone(
            ts,
            DEPENDENCIES_TABLE,
            &dep.id,
            current.map(|doc| doc.ts),
        ));
        batch.add_indexes(retired);
        self.store.write(&batch).await?;
        Ok(true)
    }

    /// Edges where `issue_id` is the dependent.
    pub async fn dependencies_for(&self, issue_id: &str) -> StoreResult<Vec<Dependency>> {
        self.scan_dependencies(DEPENDENCIES_BY_ISSUE, issue_id).await
    }

    /// Edges where `issue_id` is depended upon.
    pub async fn dependents_of(&self, issue_id: &str) -> StoreResult<Vec<Dependency>> {
        self.scan_dependencies(DEPENDENCIES_BY_DEPENDS_ON, issue_id)
            .await
    }

    /// Appends a comment to an issue.
    pub async fn add_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
    ) -> StoreResult<Comment> {
        let ts = (self.clock)();
        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            text: text.to_string(),
            created_at: ts,
        };
        let value = serde_json::to_string(&comment)?;
        let mut batch = WriteBatch::new();
        batch.add_document(DocumentLogEntry::new(ts, COMMENTS_TABLE, &comment.id, value));
        batch.add_indexes(self.indexer.comment_entries(&comment, ts));
        self.store.write(&batch).await?;
        Ok(comment)
    }

    /// Comments on an issue, oldest first.
    pub async fn comments_for(&self, issue_id: &str) -> StoreResult<Vec<Comment>> {
        let reader = self.store.reader();
        let interval = Interval::prefix(&text_component(issue_id));
        let hits = reader
            .index_scan(
                COMMENTS_BY_ISSUE,
                &interval,
                Timestamp::ZERO,
                Order::Asc,
                RELATED_SCAN_LIMIT,
            )
            .await?;
        let mut comments = Vec::with_capacity(hits.len());
        for hit in hits {
            comments.push(hit.document.decode::<Comment>()?);
        }
        comments.sort_by_key(|comment| comment.created_at);
        Ok(comments)
    }

    /// Stores a configuration value in the global KV.
    pub async fn set_config(&self, key: &str, value: &str) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        self.store.write_global(key, &json).await
    }

    /// Reads a configuration value from the global KV.
    pub async fn get_config(&self, key: &str) -> StoreResult<Option<String>> {
        match self.store.get_global(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Issue counts overall and per status.
    pub async fn issue_stats(&self) -> StoreResult<IssueStats> {
        let reader = self.store.reader();
        let mut by_status = HashMap::new();
        for status in [
            Status::Open,
            Status::InProgress,
            Status::Blocked,
            Status::Closed,
        ] {
            let interval = Interval::prefix(&text_component(status.as_str()));
            let hits = reader
                .index_scan(
                    ISSUES_BY_STATUS,
                    &interval,
                    Timestamp::ZERO,
                    Order::Asc,
                    RELATED_SCAN_LIMIT,
                )
                .await?;
            if !hits.is_empty() {
                by_status.insert(status, hits.len());
            }
        }
        let total = reader.document_count(ISSUES_TABLE).await?;
        Ok(IssueStats { total, by_status })
    }

    /// Maps an indexed filter field onto its scan interval. The first
    /// set field wins, checked from the narrowest index to the widest:
    /// status, priority, type, parent, assignee, then first label.
    /// Remaining fields are matched in memory afterwards.
    fn filter_interval(&self, filter: &IssueFilter) -> Option<(&'static str, Interval)> {
        use chronostore_core::index::{
            int_component, ISSUES_BY_ASSIGNEE, ISSUES_BY_LABEL, ISSUES_BY_PARENT,
            ISSUES_BY_PRIORITY, ISSUES_BY_TYPE,
        };
        if let Some(status) = filter.status {
            return Some((
                ISSUES_BY_STATUS,
                Interval::prefix(&text_component(status.as_str())),
            ));
        }
        if let Some(priority) = filter.priority {
            return Some((ISSUES_BY_PRIORITY, Interval::prefix(&int_component(priority))));
        }
        if let Some(issue_type) = filter.issue_type {
            return Some((
                ISSUES_BY_TYPE,
                Interval::prefix(&text_component(issue_type.as_str())),
            ));
        }
        if let Some(parent) = &filter.parent {
            return Some((ISSUES_BY_PARENT, Interval::prefix(&text_component(parent))));
        }
        if let Some(assignee) = &filter.assignee {
            return Some((
                ISSUES_BY_ASSIGNEE,
                Interval::prefix(&text_component(assignee)),
            ));
        }
        if let Some(label) = filter.labels.first() {
            return Some((ISSUES_BY_LABEL, Interval::prefix(&text_component(label))));
        }
        None
    }

    async fn scan_dependencies(&self, index_id: &str, issue_id: &str) -> StoreResult<Vec<Dependency>> {
        let reader = self.store.reader();
        let interval = Interval::prefix(&text_component(issue_id));
        let hits = reader
            .index_scan(
                index_id,
                &interval,
                Timestamp::ZERO,
                Order::Asc,
                RELATED_SCAN_LIMIT,
            )
            .await?;
        let mut deps = Vec::with_capacity(hits.len());
        for hit in hits {
            deps.push(hit.document.decode::<Dependency>()?);
        }
        Ok(deps)
    }

    /// Folds the full table history down to the latest live version per
    /// issue id. Fallback for searches no index covers.
    async fn latest_issues(&self) -> StoreResult<Vec<Issue>> {
        let reader = self.store.reader();
        let history = reader
            .load_documents(
                ISSUES_TABLE,
                chronostore_core::TimestampRange::all_time(),
                Order::Asc,
            )
            .await?;
        let mut latest: HashMap<String, DocumentLogEntry> = HashMap::new();
        for doc in history {
            // Ascending order, so a later version simply replaces.
            latest.insert(doc.id.clone(), doc);
        }
        let mut issues = Vec::with_capacity(latest.len());
        for doc in latest.into_values() {
            if !doc.is_deleted() {
                issues.push(doc.decode::<Issue>()?);
            }
        }
        issues.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(issues)
    }
}

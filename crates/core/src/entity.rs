//! Domain entities persisted as document log values.
//!
//! Entities round-trip through JSON; the persistence layer never
//! inspects them. Field additions are backward compatible as long as
//! they are optional or defaulted.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Logical table holding issues.
pub const ISSUES_TABLE: &str = "issues";
/// Logical table holding dependency edges.
pub const DEPENDENCIES_TABLE: &str = "dependencies";
/// Logical table holding comments.
pub const COMMENTS_TABLE: &str = "comments";

/// Workflow status of an issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Open and available.
    #[default]
    Open,
    /// Actively being worked.
    InProgress,
    /// Waiting on a dependency.
    Blocked,
    /// Done.
    Closed,
}

impl Status {
    /// Stable string form used in index keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Blocked => "blocked",
            Status::Closed => "closed",
        }
    }
}

/// Kind of work an issue represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Defect.
    Bug,
    /// New capability.
    Feature,
    /// Unit of work.
    #[default]
    Task,
    /// Container for related issues.
    Epic,
    /// Maintenance.
    Chore,
}

impl IssueType {
    /// Stable string form used in index keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Bug => "bug",
            IssueType::Feature => "feature",
            IssueType::Task => "task",
            IssueType::Epic => "epic",
            IssueType::Chore => "chore",
        }
    }
}

/// An issue document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Identifier, unique within the issues table (e.g. `bd-42`).
    pub id: String,
    /// One-line summary.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Workflow status.
    #[serde(default)]
    pub status: Status,
    /// Priority; lower is more urgent.
    #[serde(default)]
    pub priority: u16,
    /// Kind of work.
    #[serde(default)]
    pub issue_type: IssueType,
    /// Parent issue id, for epics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Current assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Labels; each is indexed separately.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Timestamp,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Timestamp,
    /// Close time, if closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
    /// Why the issue was closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    /// Reference into an external tracker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// Kind of dependency edge between two issues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The dependent cannot proceed until the dependency closes.
    #[default]
    Blocks,
    /// Informational link.
    Related,
    /// Structural parent/child edge.
    ParentChild,
    /// The dependent was discovered while working the dependency.
    DiscoveredFrom,
}

/// A directed dependency edge: `issue_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Edge identifier.
    pub id: String,
    /// The dependent issue.
    pub issue_id: String,
    /// The issue depended upon.
    pub depends_on_id: String,
    /// Edge kind.
    #[serde(default)]
    pub kind: DependencyKind,
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment identifier.
    pub id: String,
    /// Issue the comment belongs to.
    pub issue_id: String,
    /// Author name.
    pub author: String,
    /// Comment body.
    pub text: String,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Filter for issue searches. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Match this status.
    pub status: Option<Status>,
    /// Match this priority.
    pub priority: Option<u16>,
    /// Match this issue type.
    pub issue_type: Option<IssueType>,
    /// Match this parent id.
    pub parent: Option<String>,
    /// Match this assignee.
    pub assignee: Option<String>,
    /// Match only unassigned issues.
    pub unassigned: bool,
    /// Issue must carry every one of these labels.
    pub labels: Vec<String>,
}

impl IssueFilter {
    /// True if `issue` satisfies every set field.
    pub fn matches(&self, issue: &Issue) -> bool {
        if let Some(status) = self.status {
            if issue.status != status {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if issue.priority != priority {
                return false;
            }
        }
        if let Some(issue_type) = self.issue_type {
            if issue.issue_type != issue_type {
                return false;
            }
        }
        if let Some(parent) = &self.parent {
            if issue.parent.as_deref() != Some(parent.as_str()) {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if issue.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if self.unassigned && issue.assignee.as_deref().is_some_and(|a| !a.is_empty()) {
            return false;
        }
        self.labels
            .iter()
            .all(|label| issue.labels.iter().any(|l| l == label))
    }
}

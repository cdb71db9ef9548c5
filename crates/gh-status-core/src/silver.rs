//! The Silver layer: canonical entities and event facts projected from Bronze.

use crate::ids::{EventFactId, RepositoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository tracked by the pipeline, canonicalised from whatever
/// upstream identifier each source system uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Storage-assigned identifier, stable across renames.
    pub id: RepositoryId,
    /// The external id used by the source system, e.g. a GitHub node id.
    pub external_id: String,
    /// `owner/name` at the time of the most recent event.
    pub owner: String,
    /// `owner/name` at the time of the most recent event.
    pub name: String,
    /// The branch the projector treats as mainline, defaulting to `"main"`
    /// for repositories it has not seen a branch reported for yet.
    pub default_branch: String,
    /// Path prefixes this repository considers documentation. Falls back to
    /// the projector's built-in defaults when empty.
    pub documentation_paths: Vec<String>,
    /// Whether this repository is enrolled for active ingestion. Ad-hoc rows
    /// created by the projector for a repository the registry doesn't know
    /// about yet start disabled.
    pub ingestion_enabled: bool,
    /// First time this repository was observed.
    pub first_seen_at: DateTime<Utc>,
    /// Most recent event timestamp affecting this repository.
    pub last_seen_at: DateTime<Utc>,
}

/// A commit entity projected from push events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// The repository this commit belongs to.
    pub repository_id: RepositoryId,
    /// The commit SHA, natural key within a repository.
    pub sha: String,
    /// Author-supplied commit message.
    pub message: String,
    /// Author identity as reported by the source system.
    pub author: String,
    /// When the commit was authored.
    pub authored_at: DateTime<Utc>,
    /// Paths touched by the commit, used for work-type classification.
    pub changed_paths: Vec<String>,
}

/// The lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    /// Open and unmerged.
    Open,
    /// Closed without merging.
    Closed,
    /// Merged into its target branch.
    Merged,
}

/// A pull request entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// The repository this pull request belongs to.
    pub repository_id: RepositoryId,
    /// The source system's pull request number, natural key within a repository.
    pub number: i64,
    /// Title at the time of the most recent event.
    pub title: String,
    /// Current lifecycle state.
    pub state: PullRequestState,
    /// When the pull request was opened.
    pub opened_at: DateTime<Utc>,
    /// When the pull request was closed or merged, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
    /// Login of the author.
    pub author: String,
}

/// The lifecycle state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    /// Open.
    Open,
    /// Closed.
    Closed,
}

/// An issue entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// The repository this issue belongs to.
    pub repository_id: RepositoryId,
    /// The source system's issue number, natural key within a repository.
    pub number: i64,
    /// Title at the time of the most recent event.
    pub title: String,
    /// Current lifecycle state.
    pub state: IssueState,
    /// Labels attached at the time of the most recent event.
    pub labels: Vec<String>,
    /// When the issue was opened.
    pub opened_at: DateTime<Utc>,
    /// When the issue was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
}

/// A documentation-only change, distinguished from ordinary commits so that
/// evidence bundles and work-type grouping can surface documentation effort
/// separately from code changes.
///
/// Deduplicates on `(repository_id, commit_sha, path)`: one row per path
/// touched, not one row per commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationChange {
    /// The repository this change belongs to.
    pub repository_id: RepositoryId,
    /// The commit SHA the change was carried on.
    pub commit_sha: String,
    /// A single path recognised as documentation.
    pub path: String,
    /// When the change occurred.
    pub occurred_at: DateTime<Utc>,
}

/// An event fact: a Silver-layer record of "this raw event produced this
/// observable effect", used by the evidence bundle builder to select
/// windowed activity without re-deriving it from entity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFact {
    /// Storage-assigned identifier.
    pub id: EventFactId,
    /// The repository the fact concerns.
    pub repository_id: RepositoryId,
    /// A short classification, e.g. `"commit"`, `"pr_opened"`, `"pr_merged"`,
    /// `"issue_opened"`, `"issue_closed"`, `"doc_change"`.
    pub kind: String,
    /// When the underlying event occurred. Facts are ordered by
    /// `(occurred_at, id)` for deterministic windowed selection.
    pub occurred_at: DateTime<Utc>,
    /// A short human-readable summary used directly in rendered reports.
    pub summary: String,
}

/// The per-(repository, stream) watermark and pagination state tracked by
/// the ingestion worker.
///
/// Keyed by the source system's external repository id rather than the
/// Silver-layer [`RepositoryId`]: ingestion runs before projection, so a
/// repository may not have a Silver identity yet when its first offset is
/// recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionOffset {
    /// The source system's external repository id this offset is scoped to.
    pub repository_external_id: String,
    /// The upstream stream kind: `"commits"`, `"pull_requests"`, `"issues"`,
    /// or `"doc_changes"`.
    pub stream_kind: String,
    /// The latest `occurred_at` successfully ingested for this stream.
    pub watermark: DateTime<Utc>,
    /// An opaque pagination cursor into the upstream API, when the stream
    /// was truncated mid-page and has more data pending.
    pub cursor: Option<String>,
    /// Last time this offset was advanced.
    pub updated_at: DateTime<Utc>,
}

impl IngestionOffset {
    /// Whether there is a pending cursor, i.e. a previous run was truncated
    /// before reaching the end of a page.
    pub fn has_pending_cursor(&self) -> bool {
        self.cursor.is_some()
    }
}

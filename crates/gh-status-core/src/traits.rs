//! Storage-trait boundaries implemented by concrete Bronze/Silver/Gold
//! backends. Mirrors the split between `StorageBackend` (payload-level) and
//! higher-level stores seen in storage-layer crates elsewhere in this
//! workspace family, generalised to the three-tier medallion model.

use crate::error::GhStatusError;
use crate::ids::{EventFactId, RawEventId, ReportId, RepositoryId};
use crate::raw_event::{RawEvent, RawEventEnvelope};
use crate::registry::RepositoryRecord;
use crate::report::{Report, ReportCoverage, ReportReview};
use crate::silver::{
    Commit, DocumentationChange, EventFact, Issue, PullRequest, Repository, IngestionOffset,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The fixed set of upstream event streams the ingestion worker pulls, in
/// the deterministic order it always processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Push events, the source of commits.
    Commits,
    /// Pull request lifecycle events.
    PullRequest,
    /// Issue lifecycle events.
    Issues,
    /// Documentation-only changes, pulled as their own stream so they can be
    /// watermarked independently of ordinary commits.
    DocChanges,
}

impl StreamKind {
    /// Every stream kind, in the fixed order ingestion processes them.
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Commits,
        StreamKind::PullRequest,
        StreamKind::Issues,
        StreamKind::DocChanges,
    ];

    /// The stable string used as a storage key and in upstream API paths.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Commits => "commits",
            StreamKind::PullRequest => "pull_requests",
            StreamKind::Issues => "issues",
            StreamKind::DocChanges => "doc_changes",
        }
    }

    /// The singular event-type vocabulary the entity projector recognises on
    /// `RawEventEnvelope::event_type`. Distinct from [`StreamKind::as_str`]:
    /// that vocabulary names upstream *streams* (plural), this one names the
    /// *effect* a single event had (singular).
    pub fn event_type(self) -> &'static str {
        match self {
            StreamKind::Commits => "commit",
            StreamKind::PullRequest => "pull_request",
            StreamKind::Issues => "issue",
            StreamKind::DocChanges => "doc_change",
        }
    }
}

/// The Bronze store: append-only raw events plus per-stream ingestion
/// watermarks/cursors.
#[async_trait]
pub trait BronzeStore: Send + Sync {
    /// Ingest one envelope. Returns the existing row, unchanged, when the
    /// envelope's dedupe key already exists.
    async fn ingest(&self, envelope: RawEventEnvelope) -> Result<RawEvent, GhStatusError>;

    /// Fetch up to `limit` unprocessed events in `(occurred_at, id)` order.
    async fn list_unprocessed(&self, limit: i64) -> Result<Vec<RawEvent>, GhStatusError>;

    /// Mark an event as successfully projected.
    async fn mark_processed(&self, id: RawEventId) -> Result<(), GhStatusError>;

    /// Mark an event as rejected by projection, recording why. Silver is
    /// left untouched for events marked this way.
    async fn mark_failed(&self, id: RawEventId, reason: &str) -> Result<(), GhStatusError>;

    /// Read the current watermark/cursor for a repository's stream.
    async fn get_offset(
        &self,
        repository_external_id: &str,
        stream_kind: StreamKind,
    ) -> Result<Option<IngestionOffset>, GhStatusError>;

    /// Advance the watermark/cursor for a repository's stream.
    async fn put_offset(&self, offset: IngestionOffset) -> Result<(), GhStatusError>;

    /// Every tracked offset across all repositories and streams, for the
    /// health service's lag computation.
    async fn list_offsets(&self) -> Result<Vec<IngestionOffset>, GhStatusError>;
}

/// The Silver store: canonical entities and event facts.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Upsert a repository by external id, returning its storage identifier.
    async fn upsert_repository(&self, repository: Repository) -> Result<RepositoryId, GhStatusError>;

    /// Look up a repository by the source system's external id.
    async fn get_repository_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Repository>, GhStatusError>;

    /// Look up a repository by its storage-assigned identifier.
    async fn get_repository(&self, repository_id: RepositoryId) -> Result<Option<Repository>, GhStatusError>;

    /// Look up a repository by its current `(owner, name)`, as used by the
    /// on-demand reporting endpoint.
    async fn get_repository_by_owner_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Repository>, GhStatusError>;

    /// Upsert a commit by `(repository_id, sha)`.
    async fn upsert_commit(&self, commit: Commit) -> Result<(), GhStatusError>;

    /// Upsert a pull request by `(repository_id, number)`.
    async fn upsert_pull_request(&self, pull_request: PullRequest) -> Result<(), GhStatusError>;

    /// Upsert an issue by `(repository_id, number)`.
    async fn upsert_issue(&self, issue: Issue) -> Result<(), GhStatusError>;

    /// Upsert a documentation change by `(repository_id, commit_sha, path)`.
    async fn upsert_documentation_change(
        &self,
        change: DocumentationChange,
    ) -> Result<(), GhStatusError>;

    /// Insert an event fact, re-reading and returning the existing row if a
    /// concurrent projection already inserted an equivalent fact.
    async fn insert_event_fact(&self, fact: EventFact) -> Result<EventFactId, GhStatusError>;

    /// List facts for a repository within a half-open window, ordered by
    /// `(occurred_at, id)`.
    async fn list_event_facts(
        &self,
        repository_id: RepositoryId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<EventFact>, GhStatusError>;
}

/// The Gold store: reports, their coverage, and failed-validation reviews.
#[async_trait]
pub trait GoldStore: Send + Sync {
    /// Persist a report together with its coverage record.
    async fn insert_report(
        &self,
        report: Report,
        coverage: ReportCoverage,
    ) -> Result<(), GhStatusError>;

    /// The most recently generated report for a repository, if any.
    async fn latest_report(&self, repository_id: RepositoryId) -> Result<Option<Report>, GhStatusError>;

    /// The `limit` most recent reports for a repository, newest first.
    async fn recent_reports(
        &self,
        repository_id: RepositoryId,
        limit: i64,
    ) -> Result<Vec<Report>, GhStatusError>;

    /// Fetch a report by id.
    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, GhStatusError>;

    /// Fetch the coverage record recorded alongside a report.
    async fn get_coverage(&self, report_id: ReportId) -> Result<Option<ReportCoverage>, GhStatusError>;

    /// Persist a review record for a report that exhausted its validation budget.
    async fn insert_review(&self, review: ReportReview) -> Result<(), GhStatusError>;
}

/// The repository registry: which repositories are enrolled for ingestion.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert or update a registry record, keyed by external id.
    async fn upsert(&self, record: RepositoryRecord) -> Result<(), GhStatusError>;

    /// Enable or disable ingestion for a registered repository.
    async fn set_ingestion_enabled(
        &self,
        external_id: &str,
        enabled: bool,
    ) -> Result<(), GhStatusError>;

    /// All repositories currently enabled for ingestion.
    async fn list_active(&self) -> Result<Vec<RepositoryRecord>, GhStatusError>;

    /// Every registry record regardless of enrolment state, used to detect
    /// repositories that have dropped out of a catalogue since the last sync.
    async fn list_all(&self) -> Result<Vec<RepositoryRecord>, GhStatusError>;

    /// Look up a single registry record by external id.
    async fn get(&self, external_id: &str) -> Result<Option<RepositoryRecord>, GhStatusError>;
}

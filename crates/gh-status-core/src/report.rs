//! The Gold layer: reports and their supporting coverage and review records.

use crate::ids::{EventFactId, ReportId, ReportReviewId, RepositoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The scope a report or a unit of coverage was produced at. Coverage
/// exclusion joins must never let estate- or project-scope coverage mask
/// repository-scope gaps; see [`ReportCoverage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportScope {
    /// A single repository.
    Repository,
    /// A named group of repositories.
    Project,
    /// The entire tracked estate.
    Estate,
}

/// Coarse health signal a status model assigns to the window it summarised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Work is progressing as expected.
    OnTrack,
    /// Work is progressing but has notable risk.
    AtRisk,
    /// Work is stalled on a dependency or blocker.
    Blocked,
    /// The backend could not determine a status.
    Unknown,
}

impl Default for ReportStatus {
    fn default() -> Self {
        ReportStatus::Unknown
    }
}

/// A generated status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Storage-assigned identifier.
    pub id: ReportId,
    /// The repository this report covers. Project/estate rollups are out of
    /// scope for this pipeline; every report is repository-scoped.
    pub repository_id: RepositoryId,
    /// Inclusive start of the reporting window.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the reporting window. The next report for the same
    /// repository must start exactly here.
    pub window_end: DateTime<Utc>,
    /// The rendered Markdown body.
    pub body: String,
    /// The status model's coarse health signal for the window.
    pub status: ReportStatus,
    /// Identifier of the status model backend that produced this report.
    pub model: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// How many validation attempts this report took before it passed, or
    /// exhausted its budget and was persisted as a [`ReportReview`] instead.
    pub validation_attempts: u32,
    /// Wall-clock time spent in the status model call, when measured.
    pub model_latency_ms: Option<u64>,
    /// Prompt tokens billed for the call, when the backend reports them.
    pub prompt_tokens: Option<u32>,
    /// Completion tokens billed for the call, when the backend reports them.
    pub completion_tokens: Option<u32>,
    /// Total tokens billed for the call, when the backend reports them.
    pub total_tokens: Option<u32>,
}

/// A coverage record: which event facts a report actually drew on. Used to
/// detect and prevent cross-scope coverage leakage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCoverage {
    /// The report this coverage belongs to.
    pub report_id: ReportId,
    /// The scope the covering report was generated at.
    pub scope: ReportScope,
    /// The repository the coverage applies to.
    pub repository_id: RepositoryId,
    /// Event facts the report drew on.
    pub fact_ids: Vec<EventFactId>,
}

/// A single failed validation rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// The rule that failed, e.g. `"empty_summary"`, `"truncated_summary"`,
    /// `"implausible_highlights"`.
    pub rule: String,
    /// A human-readable explanation of why the rule failed.
    pub detail: String,
}

/// Whether a [`ReportReview`] still needs operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    /// No operator action has resolved this review yet.
    Pending,
    /// An operator has addressed the review; re-running the window is safe.
    Resolved,
}

/// A record persisted when a report exhausts its validation retry budget
/// without producing a passing draft. The operator can inspect and act on
/// it; the pipeline does not retry automatically beyond this point.
///
/// Unique per `(repository_id, window_start, window_end)`: re-running a
/// failing window updates the existing row instead of creating a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportReview {
    /// Storage-assigned identifier, surfaced to operators in the 422 body.
    pub id: ReportReviewId,
    /// The repository the failed report was for.
    pub repository_id: RepositoryId,
    /// The window the failed report would have covered.
    pub window_start: DateTime<Utc>,
    /// The window the failed report would have covered.
    pub window_end: DateTime<Utc>,
    /// The last generated draft body, kept for operator review.
    pub last_draft: String,
    /// Every validation issue from the final failed attempt.
    pub issues: Vec<ValidationIssue>,
    /// How many validation attempts were made before the budget was exhausted.
    pub attempts: u32,
    /// Whether this review still needs operator attention.
    pub state: ReviewState,
    /// When the review was recorded.
    pub created_at: DateTime<Utc>,
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-orchestrator** – window planning, status model invocation,
//! validation and persistence for repository status reports.
//!
//! `run_for_repository` is the single public entry point: it computes the
//! next contiguous window, builds the evidence bundle, invokes the status
//! model, validates the draft against the rules in [`validate`], retries on
//! failure up to a configured budget, and persists either a [`Report`] or a
//! [`ReportReview`] in one outcome.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use gh_status_core::error::GhStatusError;
use gh_status_core::ids::{ReportId, ReportReviewId, RepositoryId};
use gh_status_core::report::{Report, ReportCoverage, ReportReview, ReportScope, ReviewState, ValidationIssue};
use gh_status_core::traits::{GoldStore, ProjectionStore};
use gh_status_evidence::{EvidenceBuilder, EvidenceBundle};
use gh_status_model::{StatusModel, StatusSummary, SummaryRequest};
use gh_status_render::{render, ReportDocument, ReportSink};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const TRUNCATION_MARKERS: [&str; 2] = ["...", "\u{2026}"];

/// Tunables governing window sizing and validation retries.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Width of the very first window for a repository with no prior report.
    pub default_window_days: i64,
    /// Maximum number of draft-and-validate attempts before giving up and
    /// recording a [`ReportReview`].
    pub validation_max_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_window_days: 7,
            validation_max_attempts: 2,
        }
    }
}

/// The result of one `run_for_repository` call.
#[derive(Debug, Clone)]
pub enum ReportOutcome {
    /// A report was generated, validated and persisted.
    Generated(Report),
    /// The window had no uncovered evidence; nothing was generated.
    NoEvidence,
    /// Every validation attempt failed; a [`ReportReview`] was persisted
    /// for operator follow-up instead.
    ValidationFailed(ReportReview),
}

/// Plans windows, drives the status model, validates drafts and persists
/// the outcome, with at most one in-flight run per repository.
pub struct Orchestrator<P, G> {
    silver: Arc<P>,
    gold: Arc<G>,
    evidence: Arc<EvidenceBuilder<P, G>>,
    model: Arc<StatusModel>,
    sink: Option<Arc<ReportSink>>,
    config: OrchestratorConfig,
    repo_locks: DashMap<RepositoryId, Arc<tokio::sync::Mutex<()>>>,
}

impl<P, G> Orchestrator<P, G>
where
    P: ProjectionStore,
    G: GoldStore,
{
    /// Build an orchestrator over the given stores and status model,
    /// optionally writing rendered reports to `sink`.
    pub fn new(
        silver: Arc<P>,
        gold: Arc<G>,
        model: Arc<StatusModel>,
        sink: Option<Arc<ReportSink>>,
        config: OrchestratorConfig,
    ) -> Self {
        let evidence = Arc::new(EvidenceBuilder::new(silver.clone(), gold.clone()));
        Self {
            silver,
            gold,
            evidence,
            model,
            sink,
            config,
            repo_locks: DashMap::new(),
        }
    }

    /// The half-open window the next report for `repository_id` should
    /// cover: starting where the previous repository report left off, or
    /// `now - default_window_days` when there is none, always ending now.
    pub async fn compute_next_window(
        &self,
        repository_id: RepositoryId,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), GhStatusError> {
        let window_end = Utc::now();
        let window_start = match self.gold.latest_report(repository_id).await? {
            Some(previous) => previous.window_end,
            None => window_end - Duration::days(self.config.default_window_days),
        };
        Ok((window_start, window_end))
    }

    fn lock_for(&self, repository_id: RepositoryId) -> Arc<tokio::sync::Mutex<()>> {
        self.repo_locks
            .entry(repository_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run one reporting pass for `repository_id`: plan the window, build
    /// evidence, generate and validate a summary, and persist the outcome.
    #[instrument(skip(self))]
    pub async fn run_for_repository(
        &self,
        repository_id: RepositoryId,
    ) -> Result<ReportOutcome, GhStatusError> {
        let lock = self.lock_for(repository_id);
        let _guard = lock.lock().await;

        let (window_start, window_end) = self.compute_next_window(repository_id).await?;

        let bundle = match self.evidence.build(repository_id, window_start, window_end).await {
            Ok(bundle) => bundle,
            Err(GhStatusError::EvidenceEmpty) => return Ok(ReportOutcome::NoEvidence),
            Err(e) => return Err(e),
        };

        let repository = self
            .silver
            .get_repository(repository_id)
            .await?
            .ok_or_else(|| GhStatusError::UnknownRepository(repository_id.to_string()))?;

        let request = build_request(&repository.owner, &repository.name, &bundle);

        let mut last_summary: Option<StatusSummary> = None;
        let mut last_issues: Vec<ValidationIssue> = Vec::new();
        let mut attempts = 0u32;

        while attempts < self.config.validation_max_attempts {
            attempts += 1;
            let started = std::time::Instant::now();
            let summary = self.model.summarize(request.clone()).await?;
            let latency_ms = started.elapsed().as_millis() as u64;
            let issues = validate(&summary, &bundle);
            if issues.is_empty() {
                return self
                    .persist_report(
                        repository_id,
                        &repository,
                        window_start,
                        window_end,
                        summary,
                        attempts,
                        latency_ms,
                        &bundle,
                    )
                    .await;
            }
            warn!(attempts, issue_count = issues.len(), "report draft failed validation");
            last_issues = issues;
            last_summary = Some(summary);
        }

        let last_draft = last_summary.map(|s| s.summary_text).unwrap_or_default();
        let review = ReportReview {
            id: ReportReviewId::new(),
            repository_id,
            window_start,
            window_end,
            last_draft,
            issues: last_issues,
            attempts,
            state: ReviewState::Pending,
            created_at: Utc::now(),
        };
        self.gold.insert_review(review.clone()).await?;
        info!(review_id = %review.id, "report exhausted validation retries, recorded for review");
        Ok(ReportOutcome::ValidationFailed(review))
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_report(
        &self,
        repository_id: RepositoryId,
        repository: &gh_status_core::silver::Repository,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        summary: StatusSummary,
        validation_attempts: u32,
        model_latency_ms: u64,
        bundle: &EvidenceBundle,
    ) -> Result<ReportOutcome, GhStatusError> {
        let report_id = ReportId::new();
        let generated_at = Utc::now();
        let status = summary.status;
        let usage = summary.usage;
        let model_name = self.model.model_name();
        let document = ReportDocument {
            report_id,
            owner: repository.owner.clone(),
            name: repository.name.clone(),
            window_start,
            window_end,
            model: model_name.clone(),
            generated_at,
            summary,
        };
        let body = render(&document);

        let report = Report {
            id: report_id,
            repository_id,
            window_start,
            window_end,
            body,
            status,
            model: model_name,
            generated_at,
            validation_attempts,
            model_latency_ms: Some(model_latency_ms),
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
            total_tokens: usage.map(|u| u.total_tokens),
        };
        let coverage = ReportCoverage {
            report_id,
            scope: ReportScope::Repository,
            repository_id,
            fact_ids: bundle.facts.iter().map(|f| f.id).collect(),
        };
        self.gold.insert_report(report.clone(), coverage).await?;

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.write_report(&document).await {
                warn!(error = %e, "failed to write rendered report to sink");
            }
        }

        info!(report_id = %report.id, "report generated");
        Ok(ReportOutcome::Generated(report))
    }
}

fn build_request(owner: &str, name: &str, bundle: &EvidenceBundle) -> SummaryRequest {
    let mut work_type_counts = BTreeMap::new();
    for (work_type, facts) in &bundle.work_type_groups {
        work_type_counts.insert(work_type.label().to_string(), facts.len());
    }
    SummaryRequest {
        repository_slug: format!("{owner}/{name}"),
        window_start: bundle.window_start,
        window_end: bundle.window_end,
        fact_summaries: bundle.facts.iter().map(|f| f.summary.clone()).collect(),
        work_type_counts,
        prior_narratives: bundle.prior_reports.iter().map(|r| r.body.clone()).collect(),
    }
}

/// Validate a draft summary against a bundle, returning every violated rule.
/// An empty result means the draft passes.
pub fn validate(summary: &StatusSummary, bundle: &EvidenceBundle) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if summary.summary_text.trim().is_empty() {
        issues.push(ValidationIssue {
            rule: "empty_summary".to_string(),
            detail: "summary text is empty or whitespace-only".to_string(),
        });
    }

    let trimmed = summary.summary_text.trim_end();
    if TRUNCATION_MARKERS.iter().any(|marker| trimmed.ends_with(marker)) {
        issues.push(ValidationIssue {
            rule: "truncated_summary".to_string(),
            detail: "summary text ends with an ellipsis".to_string(),
        });
    }

    let max_plausible_highlights = 5 * bundle.facts.len();
    if summary.highlights.len() > max_plausible_highlights {
        issues.push(ValidationIssue {
            rule: "implausible_highlights".to_string(),
            detail: format!(
                "{} highlights exceeds 5x the {} evidenced facts",
                summary.highlights.len(),
                bundle.facts.len()
            ),
        });
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_core::ids::{EventFactId, RepositoryId};
    use gh_status_core::silver::{EventFact, Repository};
    use async_trait::async_trait;
    use gh_status_model::{HeuristicProvider, ReportStatus, StatusModelProvider};
    use gh_status_store_memory::MemoryStore;

    #[derive(Debug, Default)]
    struct BlankProvider;

    #[async_trait]
    impl StatusModelProvider for BlankProvider {
        fn name(&self) -> String {
            "blank".to_string()
        }

        async fn summarize(&self, _request: &SummaryRequest) -> Result<StatusSummary, GhStatusError> {
            Ok(StatusSummary {
                status: ReportStatus::Unknown,
                summary_text: String::new(),
                highlights: vec![],
                risks: vec![],
                next_steps: vec![],
                usage: None,
            })
        }
    }

    fn repository(external_id: &str, owner: &str, name: &str, now: DateTime<Utc>) -> Repository {
        Repository {
            id: RepositoryId::new(),
            external_id: external_id.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            default_branch: "main".to_string(),
            documentation_paths: Vec::new(),
            ingestion_enabled: true,
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    fn fact(repository_id: RepositoryId, occurred_at: DateTime<Utc>) -> EventFact {
        EventFact {
            id: EventFactId::new(),
            repository_id,
            kind: "commit".to_string(),
            occurred_at,
            summary: "pushed a commit".to_string(),
        }
    }

    async fn orchestrator(
        store: Arc<MemoryStore>,
    ) -> Orchestrator<MemoryStore, MemoryStore> {
        let model = Arc::new(StatusModel::new(Arc::new(HeuristicProvider), 1000));
        Orchestrator::new(store.clone(), store, model, None, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn no_evidence_returns_no_evidence_outcome() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store).await;
        let outcome = orchestrator.run_for_repository(RepositoryId::new()).await.unwrap();
        assert!(matches!(outcome, ReportOutcome::NoEvidence));
    }

    #[tokio::test]
    async fn generates_and_persists_a_report_for_fresh_evidence() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let repo = repository("gh:1", "acme", "widgets", now - Duration::days(10));
        let repository_id = store.upsert_repository(repo).await.unwrap();
        store.insert_event_fact(fact(repository_id, now)).await.unwrap();

        let orchestrator = orchestrator(store.clone()).await;
        let outcome = orchestrator.run_for_repository(repository_id).await.unwrap();

        match outcome {
            ReportOutcome::Generated(report) => {
                assert_eq!(report.repository_id, repository_id);
                assert!(report.body.contains("acme/widgets"));
            }
            other => panic!("expected a generated report, got {other:?}"),
        }

        let persisted = store.latest_report(repository_id).await.unwrap();
        assert!(persisted.is_some());
    }

    #[tokio::test]
    async fn a_second_run_continues_from_the_previous_windows_end() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let repo = repository("gh:1", "acme", "widgets", now - Duration::days(10));
        let repository_id = store.upsert_repository(repo).await.unwrap();
        store.insert_event_fact(fact(repository_id, now - Duration::days(5))).await.unwrap();

        let orchestrator = orchestrator(store.clone()).await;
        orchestrator.run_for_repository(repository_id).await.unwrap();
        let first = store.latest_report(repository_id).await.unwrap().unwrap();

        let (next_start, _) = orchestrator.compute_next_window(repository_id).await.unwrap();
        assert_eq!(next_start, first.window_end);
    }

    #[tokio::test]
    async fn exhausting_validation_retries_records_a_pending_review_with_attempts() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let repo = repository("gh:1", "acme", "widgets", now - Duration::days(10));
        let repository_id = store.upsert_repository(repo).await.unwrap();
        store.insert_event_fact(fact(repository_id, now)).await.unwrap();

        let config = OrchestratorConfig {
            default_window_days: 7,
            validation_max_attempts: 2,
        };
        let model = Arc::new(StatusModel::new(Arc::new(BlankProvider), 1000));
        let orchestrator = Orchestrator::new(store.clone(), store, model, None, config);

        let outcome = orchestrator.run_for_repository(repository_id).await.unwrap();
        match outcome {
            ReportOutcome::ValidationFailed(review) => {
                assert_eq!(review.attempts, 2);
                assert_eq!(review.state, ReviewState::Pending);
                assert!(!review.issues.is_empty());
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_an_empty_summary() {
        let bundle = EvidenceBundle {
            repository_id: RepositoryId::new(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            facts: vec![],
            work_type_groups: BTreeMap::new(),
            prior_reports: vec![],
        };
        let summary = StatusSummary {
            status: ReportStatus::Unknown,
            summary_text: "   ".to_string(),
            highlights: vec![],
            risks: vec![],
            next_steps: vec![],
            usage: None,
        };
        let issues = validate(&summary, &bundle);
        assert!(issues.iter().any(|i| i.rule == "empty_summary"));
    }

    #[test]
    fn validate_rejects_implausible_highlight_counts() {
        let repository_id = RepositoryId::new();
        let now = Utc::now();
        let bundle = EvidenceBundle {
            repository_id,
            window_start: now,
            window_end: now,
            facts: vec![fact(repository_id, now)],
            work_type_groups: BTreeMap::new(),
            prior_reports: vec![],
        };
        let summary = StatusSummary {
            status: ReportStatus::OnTrack,
            summary_text: "All good".to_string(),
            highlights: vec!["x".to_string(); 10],
            risks: vec![],
            next_steps: vec![],
            usage: None,
        };
        let issues = validate(&summary, &bundle);
        assert!(issues.iter().any(|i| i.rule == "implausible_highlights"));
    }
}

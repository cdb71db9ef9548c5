#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-evidence** – builds the evidence bundle a status report is
//! generated from.
//!
//! A bundle is the windowed set of event facts for one repository, with
//! facts already covered by an earlier *repository-scoped* report excluded.
//! Coverage recorded by a project- or estate-scoped report must never
//! suppress repository-scope facts: scope is a join key, not a hint.

use chrono::{DateTime, Utc};
use gh_status_core::error::GhStatusError;
use gh_status_core::ids::{EventFactId, RepositoryId};
use gh_status_core::report::{Report, ReportScope};
use gh_status_core::silver::EventFact;
use gh_status_core::traits::{GoldStore, ProjectionStore};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

/// How many prior reports to carry into a bundle for narrative continuity.
const PRIOR_REPORT_COUNT: i64 = 2;

/// A coarse classification of an event fact's kind, used to group evidence
/// before handing it to the status model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkType {
    /// Commits.
    Code,
    /// Pull request lifecycle events.
    Review,
    /// Issue lifecycle events.
    Planning,
    /// Documentation-only changes.
    Documentation,
    /// Anything not recognised above.
    Other,
}

impl WorkType {
    fn of(kind: &str) -> Self {
        match kind {
            "commit" => WorkType::Code,
            "doc_change" => WorkType::Documentation,
            k if k.starts_with("pr_") => WorkType::Review,
            k if k.starts_with("issue_") => WorkType::Planning,
            _ => WorkType::Other,
        }
    }

    /// A stable label used when rendering groups in a report.
    pub fn label(self) -> &'static str {
        match self {
            WorkType::Code => "Code",
            WorkType::Review => "Review",
            WorkType::Planning => "Planning",
            WorkType::Documentation => "Documentation",
            WorkType::Other => "Other",
        }
    }
}

/// The windowed, coverage-excluded evidence for one repository's report.
#[derive(Debug, Clone)]
pub struct EvidenceBundle {
    /// The repository this bundle covers.
    pub repository_id: RepositoryId,
    /// Inclusive start of the window.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the window.
    pub window_end: DateTime<Utc>,
    /// Every uncovered fact in the window, in deterministic `(occurred_at, id)` order.
    pub facts: Vec<EventFact>,
    /// Facts grouped by work type, in deterministic `WorkType` order, each
    /// group preserving fact order.
    pub work_type_groups: BTreeMap<WorkType, Vec<EventFact>>,
    /// Up to two immediately preceding reports, newest first, for narrative
    /// continuity.
    pub prior_reports: Vec<Report>,
}

/// Builds evidence bundles from Silver facts and Gold coverage history.
pub struct EvidenceBuilder<P, G> {
    silver: Arc<P>,
    gold: Arc<G>,
}

impl<P, G> EvidenceBuilder<P, G>
where
    P: ProjectionStore,
    G: GoldStore,
{
    /// Build an evidence builder over the given Silver and Gold stores.
    pub fn new(silver: Arc<P>, gold: Arc<G>) -> Self {
        Self { silver, gold }
    }

    /// Build the evidence bundle for `repository_id` over `[window_start, window_end)`.
    ///
    /// Fails with [`GhStatusError::EvidenceEmpty`] when no uncovered facts
    /// remain in the window.
    #[instrument(skip(self))]
    pub async fn build(
        &self,
        repository_id: RepositoryId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<EvidenceBundle, GhStatusError> {
        let all_facts = self
            .silver
            .list_event_facts(repository_id, window_start, window_end)
            .await?;

        let covered = self.repository_scope_coverage(repository_id).await?;
        let facts: Vec<EventFact> = all_facts
            .into_iter()
            .filter(|f| !covered.contains(&f.id))
            .collect();

        if facts.is_empty() {
            return Err(GhStatusError::EvidenceEmpty);
        }

        let mut work_type_groups: BTreeMap<WorkType, Vec<EventFact>> = BTreeMap::new();
        for fact in &facts {
            work_type_groups
                .entry(WorkType::of(&fact.kind))
                .or_default()
                .push(fact.clone());
        }

        let prior_reports = self
            .gold
            .recent_reports(repository_id, PRIOR_REPORT_COUNT)
            .await?;

        Ok(EvidenceBundle {
            repository_id,
            window_start,
            window_end,
            facts,
            work_type_groups,
            prior_reports,
        })
    }

    /// Fact ids already covered by a *repository-scoped* report for this
    /// repository. Coverage from project- or estate-scoped reports is
    /// deliberately ignored here: it must never suppress repository-scope
    /// evidence.
    async fn repository_scope_coverage(
        &self,
        repository_id: RepositoryId,
    ) -> Result<HashSet<EventFactId>, GhStatusError> {
        let mut covered = HashSet::new();
        for report in self.gold.recent_reports(repository_id, PRIOR_REPORT_COUNT).await? {
            if let Some(coverage) = self.gold.get_coverage(report.id).await? {
                if coverage.scope == ReportScope::Repository {
                    covered.extend(coverage.fact_ids);
                }
            }
        }
        Ok(covered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_core::ids::{EventFactId, ReportId};
    use gh_status_core::report::ReportCoverage;
    use gh_status_store_memory::MemoryStore;

    fn fact(repository_id: RepositoryId, kind: &str, occurred_at: DateTime<Utc>) -> EventFact {
        EventFact {
            id: EventFactId::new(),
            repository_id,
            kind: kind.to_string(),
            occurred_at,
            summary: format!("{kind} happened"),
        }
    }

    #[tokio::test]
    async fn groups_facts_by_work_type() {
        let silver = Arc::new(MemoryStore::new());
        let gold = Arc::new(MemoryStore::new());
        let builder = EvidenceBuilder::new(silver.clone(), gold.clone());

        let repository_id = RepositoryId::new();
        let now = Utc::now();
        silver.insert_event_fact(fact(repository_id, "commit", now)).await.unwrap();
        silver
            .insert_event_fact(fact(repository_id, "pr_merged", now + chrono::Duration::seconds(1)))
            .await
            .unwrap();

        let bundle = builder
            .build(repository_id, now - chrono::Duration::seconds(1), now + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(bundle.facts.len(), 2);
        assert!(bundle.work_type_groups.contains_key(&WorkType::Code));
        assert!(bundle.work_type_groups.contains_key(&WorkType::Review));
    }

    #[tokio::test]
    async fn empty_window_fails_with_evidence_empty() {
        let silver = Arc::new(MemoryStore::new());
        let gold = Arc::new(MemoryStore::new());
        let builder = EvidenceBuilder::new(silver, gold);
        let now = Utc::now();
        let err = builder
            .build(RepositoryId::new(), now, now + chrono::Duration::seconds(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GhStatusError::EvidenceEmpty));
    }

    #[tokio::test]
    async fn repository_scope_coverage_excludes_previously_reported_facts() {
        let silver = Arc::new(MemoryStore::new());
        let gold = Arc::new(MemoryStore::new());
        let builder = EvidenceBuilder::new(silver.clone(), gold.clone());

        let repository_id = RepositoryId::new();
        let now = Utc::now();
        let f1 = silver.insert_event_fact(fact(repository_id, "commit", now)).await.unwrap();

        let report_id = ReportId::new();
        gold.insert_report(
            Report {
                id: report_id,
                repository_id,
                window_start: now - chrono::Duration::seconds(1),
                window_end: now + chrono::Duration::seconds(1),
                body: "previous report".to_string(),
                status: gh_status_core::report::ReportStatus::OnTrack,
                model: "heuristic".to_string(),
                generated_at: now,
                validation_attempts: 1,
                model_latency_ms: None,
                prompt_tokens: None,
                completion_tokens: None,
                total_tokens: None,
            },
            ReportCoverage {
                report_id,
                scope: ReportScope::Repository,
                repository_id,
                fact_ids: vec![f1],
            },
        )
        .await
        .unwrap();

        let err = builder
            .build(repository_id, now - chrono::Duration::seconds(1), now + chrono::Duration::seconds(2))
            .await
            .unwrap_err();
        assert!(matches!(err, GhStatusError::EvidenceEmpty));
    }

    #[tokio::test]
    async fn project_scope_coverage_does_not_suppress_repository_facts() {
        let silver = Arc::new(MemoryStore::new());
        let gold = Arc::new(MemoryStore::new());
        let builder = EvidenceBuilder::new(silver.clone(), gold.clone());

        let repository_id = RepositoryId::new();
        let now = Utc::now();
        let f1 = silver.insert_event_fact(fact(repository_id, "commit", now)).await.unwrap();

        let report_id = ReportId::new();
        gold.insert_report(
            Report {
                id: report_id,
                repository_id,
                window_start: now - chrono::Duration::seconds(1),
                window_end: now + chrono::Duration::seconds(1),
                body: "estate rollup".to_string(),
                status: gh_status_core::report::ReportStatus::OnTrack,
                model: "heuristic".to_string(),
                generated_at: now,
                validation_attempts: 1,
                model_latency_ms: None,
                prompt_tokens: None,
                completion_tokens: None,
                total_tokens: None,
            },
            ReportCoverage {
                report_id,
                scope: ReportScope::Project,
                repository_id,
                fact_ids: vec![f1],
            },
        )
        .await
        .unwrap();

        let bundle = builder
            .build(repository_id, now - chrono::Duration::seconds(1), now + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(bundle.facts.len(), 1, "project-scope coverage must not suppress repository evidence");
    }
}

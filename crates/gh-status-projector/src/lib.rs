#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-projector** – deterministic Bronze-to-Silver entity
//! projection.
//!
//! Processes unprocessed raw events in `(occurred_at, id)` order, deriving
//! canonical entities and event facts. Projection is idempotent: replaying
//! an already-processed event must produce byte-identical Silver state.
//! When it would not, the event is marked failed with reason `DRIFT` and
//! Silver is left untouched.

use chrono::Duration;
use dashmap::DashMap;
use gh_status_core::error::GhStatusError;
use gh_status_core::ids::{EventFactId, RepositoryId};
use gh_status_core::payload::PayloadValue;
use gh_status_core::raw_event::RawEvent;
use gh_status_core::silver::{
    Commit, DocumentationChange, EventFact, Issue, IssueState, PullRequest, PullRequestState,
    Repository,
};
use gh_status_core::traits::{BronzeStore, ProjectionStore};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const DRIFT_REASON: &str = "DRIFT";
const DOC_PATH_PREFIXES: &[&str] = &["docs/", "README", "CHANGELOG"];

/// A single derived effect of one raw event: the repository it touched, any
/// entity upserts, and the event fact it would record.
struct DerivedEffect {
    repository: Repository,
    entity: EntityUpsert,
    fact_kind: String,
    fact_summary: String,
}

enum EntityUpsert {
    Commit(Commit),
    PullRequest(PullRequest),
    Issue(Issue),
    DocumentationChange(DocumentationChange),
    None,
}

/// Summary of one `run_once` invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProjectionRunSummary {
    /// Events successfully projected.
    pub processed: usize,
    /// Events rejected (schema drift, unknown payload shape, re-projection drift).
    pub failed: usize,
}

/// Projects unprocessed Bronze events into Silver entities and facts.
pub struct Projector<B, P> {
    bronze: Arc<B>,
    silver: Arc<P>,
    repo_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl<B, P> Projector<B, P>
where
    B: BronzeStore,
    P: ProjectionStore,
{
    /// Build a projector over the given Bronze and Silver stores.
    pub fn new(bronze: Arc<B>, silver: Arc<P>) -> Self {
        Self {
            bronze,
            silver,
            repo_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, external_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.repo_locks
            .entry(external_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Fetch up to `batch_size` unprocessed events and project each one.
    #[instrument(skip(self))]
    pub async fn run_once(&self, batch_size: i64) -> Result<ProjectionRunSummary, GhStatusError> {
        let events = self.bronze.list_unprocessed(batch_size).await?;
        let mut summary = ProjectionRunSummary::default();
        for event in events {
            match self.project_event(&event).await {
                Ok(true) => summary.processed += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "projection failed with a non-classified error");
                    self.bronze.mark_failed(event.id, &e.to_string()).await?;
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Project a single event. Returns `Ok(true)` if it was accepted,
    /// `Ok(false)` if it was rejected (drift or unsupported payload shape).
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn project_event(&self, event: &RawEvent) -> Result<bool, GhStatusError> {
        let repo_external_id = match &event.envelope.repo_external_id {
            Some(id) => id.clone(),
            None => {
                self.bronze
                    .mark_failed(event.id, "missing repo_external_id")
                    .await?;
                return Ok(false);
            }
        };

        let lock = self.lock_for(&repo_external_id);
        let _guard = lock.lock().await;

        let effect = match derive_effect(event) {
            Ok(effect) => effect,
            Err(e) => {
                self.bronze.mark_failed(event.id, &e.to_string()).await?;
                return Ok(false);
            }
        };

        if let Some(drift) = self.detect_drift(&effect).await? {
            debug!(reason = %drift, "rejecting event due to projection drift");
            self.bronze.mark_failed(event.id, DRIFT_REASON).await?;
            return Ok(false);
        }

        let documentation_paths = effect.repository.documentation_paths.clone();
        let repository_id = self.silver.upsert_repository(effect.repository).await?;
        self.apply_entity(repository_id, effect.entity, &documentation_paths)
            .await?;
        self.silver
            .insert_event_fact(EventFact {
                id: EventFactId::new(),
                repository_id,
                kind: effect.fact_kind,
                occurred_at: event.envelope.occurred_at,
                summary: effect.fact_summary,
            })
            .await?;
        self.bronze.mark_processed(event.id).await?;
        Ok(true)
    }

    /// Whether re-deriving this event's effect would disagree with a fact
    /// already recorded for the same `(repository, kind, occurred_at)`.
    async fn detect_drift(&self, effect: &DerivedEffect) -> Result<Option<String>, GhStatusError> {
        let repository_id = match self
            .silver
            .get_repository_by_external_id(&effect.repository.external_id)
            .await?
        {
            Some(existing) => existing.id,
            None => return Ok(None),
        };
        let window_end = effect.repository.last_seen_at + Duration::nanoseconds(1);
        let existing_facts = self
            .silver
            .list_event_facts(repository_id, effect.repository.last_seen_at, window_end)
            .await?;
        for fact in existing_facts {
            if fact.kind == effect.fact_kind && fact.summary != effect.fact_summary {
                return Ok(Some(format!(
                    "fact {} previously recorded different summary",
                    fact.id
                )));
            }
        }
        Ok(None)
    }

    async fn apply_entity(
        &self,
        repository_id: RepositoryId,
        entity: EntityUpsert,
        documentation_paths: &[String],
    ) -> Result<(), GhStatusError> {
        match entity {
            EntityUpsert::Commit(mut commit) => {
                commit.repository_id = repository_id;
                let changed_paths = commit.changed_paths.clone();
                let sha = commit.sha.clone();
                let authored_at = commit.authored_at;
                self.silver.upsert_commit(commit).await?;
                if is_documentation_only(&changed_paths, documentation_paths) {
                    for path in changed_paths {
                        self.silver
                            .upsert_documentation_change(DocumentationChange {
                                repository_id,
                                commit_sha: sha.clone(),
                                path,
                                occurred_at: authored_at,
                            })
                            .await?;
                    }
                }
            }
            EntityUpsert::PullRequest(mut pr) => {
                pr.repository_id = repository_id;
                self.silver.upsert_pull_request(pr).await?;
            }
            EntityUpsert::Issue(mut issue) => {
                issue.repository_id = repository_id;
                self.silver.upsert_issue(issue).await?;
            }
            EntityUpsert::DocumentationChange(mut change) => {
                change.repository_id = repository_id;
                self.silver.upsert_documentation_change(change).await?;
            }
            EntityUpsert::None => {}
        }
        Ok(())
    }
}

/// Whether every path a commit touched is recognised as documentation, using
/// `documentation_paths` when the repository has declared its own and
/// falling back to [`DOC_PATH_PREFIXES`] otherwise.
fn is_documentation_only(paths: &[String], documentation_paths: &[String]) -> bool {
    !paths.is_empty()
        && paths
            .iter()
            .all(|p| matches_doc_prefix(p, documentation_paths))
}

fn matches_doc_prefix(path: &str, documentation_paths: &[String]) -> bool {
    if documentation_paths.is_empty() {
        DOC_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
    } else {
        documentation_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

fn derive_effect(event: &RawEvent) -> Result<DerivedEffect, GhStatusError> {
    let envelope = &event.envelope;
    let repo_external_id = envelope
        .repo_external_id
        .clone()
        .ok_or_else(|| GhStatusError::UnsupportedPayloadType("missing repo_external_id".into()))?;

    let owner = field_str(&envelope.payload, "repo_owner")?;
    let name = field_str(&envelope.payload, "repo_name")?;

    let repository = Repository {
        id: RepositoryId::new(),
        external_id: repo_external_id,
        owner,
        name,
        default_branch: "main".to_string(),
        documentation_paths: Vec::new(),
        ingestion_enabled: false,
        first_seen_at: envelope.occurred_at,
        last_seen_at: envelope.occurred_at,
    };

    match envelope.event_type.as_str() {
        "commit" => derive_push(envelope.occurred_at, &envelope.payload, repository),
        "pull_request" => derive_pull_request(envelope.occurred_at, &envelope.payload, repository),
        "issue" => derive_issue(envelope.occurred_at, &envelope.payload, repository),
        "doc_change" => derive_doc_change(envelope.occurred_at, &envelope.payload, repository),
        other => Err(GhStatusError::UnsupportedPayloadType(format!(
            "unknown event_type {other}"
        ))),
    }
}

fn field_str(payload: &PayloadValue, key: &str) -> Result<String, GhStatusError> {
    payload
        .get(key)
        .and_then(PayloadValue::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| GhStatusError::UnsupportedPayloadType(format!("missing field {key}")))
}

fn field_timestamp(
    payload: &PayloadValue,
    key: &str,
    fallback: chrono::DateTime<chrono::Utc>,
) -> chrono::DateTime<chrono::Utc> {
    payload
        .get(key)
        .and_then(PayloadValue::as_timestamp)
        .unwrap_or(fallback)
}

fn derive_push(
    occurred_at: chrono::DateTime<chrono::Utc>,
    payload: &PayloadValue,
    mut repository: Repository,
) -> Result<DerivedEffect, GhStatusError> {
    let sha = field_str(payload, "sha")?;
    let message = field_str(payload, "message")?;
    let author = field_str(payload, "author")?;
    let authored_at = field_timestamp(payload, "authored_at", occurred_at);
    if let Some(branch) = payload.get("branch").and_then(PayloadValue::as_str) {
        repository.default_branch = branch.to_string();
    }
    let changed_paths = payload
        .get("changed_paths")
        .and_then(PayloadValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(PayloadValue::as_str)
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let summary = format!("commit {sha}: {message}");
    Ok(DerivedEffect {
        repository,
        entity: EntityUpsert::Commit(Commit {
            repository_id: RepositoryId::new(),
            sha,
            message,
            author,
            authored_at,
            changed_paths,
        }),
        fact_kind: "commit".to_string(),
        fact_summary: summary,
    })
}

fn derive_pull_request(
    occurred_at: chrono::DateTime<chrono::Utc>,
    payload: &PayloadValue,
    repository: Repository,
) -> Result<DerivedEffect, GhStatusError> {
    let number = payload
        .get("number")
        .and_then(PayloadValue::as_i64)
        .ok_or_else(|| GhStatusError::UnsupportedPayloadType("missing field number".into()))?;
    let title = field_str(payload, "title")?;
    let author = field_str(payload, "author")?;
    let state_str = field_str(payload, "state")?;
    let state = match state_str.as_str() {
        "open" => PullRequestState::Open,
        "closed" => PullRequestState::Closed,
        "merged" => PullRequestState::Merged,
        other => {
            return Err(GhStatusError::UnsupportedPayloadType(format!(
                "unknown pull request state {other}"
            )))
        }
    };
    let opened_at = field_timestamp(payload, "opened_at", occurred_at);
    let closed_at = payload.get("closed_at").and_then(PayloadValue::as_timestamp);

    let summary = match state {
        PullRequestState::Open => format!("opened PR #{number}: {title}"),
        PullRequestState::Closed => format!("closed PR #{number}: {title}"),
        PullRequestState::Merged => format!("merged PR #{number}: {title}"),
    };

    Ok(DerivedEffect {
        repository,
        entity: EntityUpsert::PullRequest(PullRequest {
            repository_id: RepositoryId::new(),
            number,
            title,
            state,
            opened_at,
            closed_at,
            author,
        }),
        fact_kind: format!("pr_{state_str}"),
        fact_summary: summary,
    })
}

fn derive_issue(
    occurred_at: chrono::DateTime<chrono::Utc>,
    payload: &PayloadValue,
    repository: Repository,
) -> Result<DerivedEffect, GhStatusError> {
    let number = payload
        .get("number")
        .and_then(PayloadValue::as_i64)
        .ok_or_else(|| GhStatusError::UnsupportedPayloadType("missing field number".into()))?;
    let title = field_str(payload, "title")?;
    let state_str = field_str(payload, "state")?;
    let state = match state_str.as_str() {
        "open" => IssueState::Open,
        "closed" => IssueState::Closed,
        other => {
            return Err(GhStatusError::UnsupportedPayloadType(format!(
                "unknown issue state {other}"
            )))
        }
    };
    let labels = payload
        .get("labels")
        .and_then(PayloadValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(PayloadValue::as_str)
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let opened_at = field_timestamp(payload, "opened_at", occurred_at);
    let closed_at = payload.get("closed_at").and_then(PayloadValue::as_timestamp);

    let summary = match state {
        IssueState::Open => format!("opened issue #{number}: {title}"),
        IssueState::Closed => format!("closed issue #{number}: {title}"),
    };

    Ok(DerivedEffect {
        repository,
        entity: EntityUpsert::Issue(Issue {
            repository_id: RepositoryId::new(),
            number,
            title,
            state,
            labels,
            opened_at,
            closed_at,
        }),
        fact_kind: format!("issue_{state_str}"),
        fact_summary: summary,
    })
}

fn derive_doc_change(
    occurred_at: chrono::DateTime<chrono::Utc>,
    payload: &PayloadValue,
    repository: Repository,
) -> Result<DerivedEffect, GhStatusError> {
    let sha = field_str(payload, "sha")?;
    let path = field_str(payload, "path")?;
    let summary = format!("documentation change {path} ({sha})");

    Ok(DerivedEffect {
        repository,
        entity: EntityUpsert::DocumentationChange(DocumentationChange {
            repository_id: RepositoryId::new(),
            commit_sha: sha,
            path,
            occurred_at,
        }),
        fact_kind: "doc_change".to_string(),
        fact_summary: summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_core::raw_event::RawEventEnvelope;
    use gh_status_store_memory::MemoryStore;
    use serde_json::json;

    fn push_envelope(sha: &str, occurred_at: chrono::DateTime<chrono::Utc>) -> RawEventEnvelope {
        RawEventEnvelope {
            source_system: "github".to_string(),
            event_type: "commit".to_string(),
            source_event_id: Some(sha.to_string()),
            repo_external_id: Some("gh:1".to_string()),
            occurred_at,
            payload: PayloadValue::from_json(&json!({
                "repo_owner": "acme",
                "repo_name": "widgets",
                "sha": sha,
                "message": "fix bug",
                "author": "alice",
                "authored_at": occurred_at.to_rfc3339(),
                "changed_paths": ["src/lib.rs"],
            }))
            .unwrap(),
        }
    }

    fn doc_commit_envelope(sha: &str, paths: &[&str], occurred_at: chrono::DateTime<chrono::Utc>) -> RawEventEnvelope {
        RawEventEnvelope {
            source_system: "github".to_string(),
            event_type: "commit".to_string(),
            source_event_id: Some(sha.to_string()),
            repo_external_id: Some("gh:1".to_string()),
            occurred_at,
            payload: PayloadValue::from_json(&json!({
                "repo_owner": "acme",
                "repo_name": "widgets",
                "sha": sha,
                "message": "update docs",
                "author": "alice",
                "authored_at": occurred_at.to_rfc3339(),
                "changed_paths": paths,
            }))
            .unwrap(),
        }
    }

    #[tokio::test]
    async fn projects_a_single_commit_and_marks_event_processed() {
        let bronze = Arc::new(MemoryStore::new());
        let silver = Arc::new(MemoryStore::new());
        let projector = Projector::new(bronze.clone(), silver.clone());

        let occurred_at = chrono::Utc::now();
        bronze.ingest(push_envelope("abc123", occurred_at)).await.unwrap();

        let summary = projector.run_once(10).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);
        assert!(bronze.list_unprocessed(10).await.unwrap().is_empty());

        let repository = silver.get_repository_by_external_id("gh:1").await.unwrap().unwrap();
        let facts = silver
            .list_event_facts(repository.id, occurred_at, occurred_at + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].kind, "commit");
    }

    #[tokio::test]
    async fn replaying_the_same_event_is_idempotent() {
        let bronze = Arc::new(MemoryStore::new());
        let silver = Arc::new(MemoryStore::new());
        let projector = Projector::new(bronze.clone(), silver.clone());

        let occurred_at = chrono::Utc::now();
        let event = bronze.ingest(push_envelope("abc123", occurred_at)).await.unwrap();

        projector.project_event(&event).await.unwrap();
        // Simulate replay: project the same already-processed event again.
        let accepted = projector.project_event(&event).await.unwrap();
        assert!(accepted);

        let repository = silver.get_repository_by_external_id("gh:1").await.unwrap().unwrap();
        let facts = silver
            .list_event_facts(repository.id, occurred_at, occurred_at + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1, "replay must not duplicate facts");
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected_without_touching_silver() {
        let bronze = Arc::new(MemoryStore::new());
        let silver = Arc::new(MemoryStore::new());
        let projector = Projector::new(bronze.clone(), silver.clone());

        let mut envelope = push_envelope("abc123", chrono::Utc::now());
        envelope.event_type = "fork".to_string();
        let event = bronze.ingest(envelope).await.unwrap();

        let summary = projector.run_once(10).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(silver
            .get_repository_by_external_id("gh:1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn a_documentation_only_commit_is_projected_without_error() {
        let bronze = Arc::new(MemoryStore::new());
        let silver = Arc::new(MemoryStore::new());
        let projector = Projector::new(bronze.clone(), silver.clone());

        let occurred_at = chrono::Utc::now();
        bronze
            .ingest(doc_commit_envelope(
                "abc123",
                &["docs/intro.md", "docs/setup.md"],
                occurred_at,
            ))
            .await
            .unwrap();

        let summary = projector.run_once(10).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);

        let repository = silver.get_repository_by_external_id("gh:1").await.unwrap().unwrap();
        let facts = silver
            .list_event_facts(repository.id, occurred_at, occurred_at + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].kind, "commit");
    }

    #[tokio::test]
    async fn a_dedicated_doc_change_event_is_projected_directly() {
        let bronze = Arc::new(MemoryStore::new());
        let silver = Arc::new(MemoryStore::new());
        let projector = Projector::new(bronze.clone(), silver.clone());

        let occurred_at = chrono::Utc::now();
        let envelope = RawEventEnvelope {
            source_system: "github".to_string(),
            event_type: "doc_change".to_string(),
            source_event_id: Some("dc1".to_string()),
            repo_external_id: Some("gh:1".to_string()),
            occurred_at,
            payload: PayloadValue::from_json(&json!({
                "repo_owner": "acme",
                "repo_name": "widgets",
                "sha": "def456",
                "path": "README.md",
            }))
            .unwrap(),
        };
        bronze.ingest(envelope).await.unwrap();

        let summary = projector.run_once(10).await.unwrap();
        assert_eq!(summary.processed, 1);

        let repository = silver.get_repository_by_external_id("gh:1").await.unwrap().unwrap();
        let facts = silver
            .list_event_facts(repository.id, occurred_at, occurred_at + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].kind, "doc_change");
    }

    #[test]
    fn is_documentation_only_falls_back_to_builtin_prefixes_when_repo_has_none() {
        let paths = vec!["docs/intro.md".to_string()];
        assert!(is_documentation_only(&paths, &[]));

        let code_paths = vec!["src/lib.rs".to_string()];
        assert!(!is_documentation_only(&code_paths, &[]));
    }

    #[test]
    fn is_documentation_only_uses_repo_specific_paths_when_declared() {
        let custom = vec!["guides/".to_string()];
        let matching = vec!["guides/start.md".to_string()];
        assert!(is_documentation_only(&matching, &custom));

        // Built-in prefixes no longer apply once the repository declares its own.
        let builtin_only = vec!["docs/intro.md".to_string()];
        assert!(!is_documentation_only(&builtin_only, &custom));
    }
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-store-memory** – an in-memory implementation of every
//! gh-status-core storage trait, for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gh_status_core::error::GhStatusError;
use gh_status_core::ids::{EventFactId, RawEventId, ReportId, RepositoryId};
use gh_status_core::raw_event::{ProcessingState, RawEvent, RawEventEnvelope};
use gh_status_core::registry::RepositoryRecord;
use gh_status_core::report::{Report, ReportCoverage, ReportReview};
use gh_status_core::silver::{
    Commit, DocumentationChange, EventFact, IngestionOffset, Issue, PullRequest, Repository,
};
use gh_status_core::traits::{BronzeStore, GoldStore, ProjectionStore, RegistryStore, StreamKind};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A single in-memory store implementing all four storage traits.
///
/// Mirrors the shape of a lock-protected `HashMap`-backed backend: one lock
/// per logical table, never held across an `.await` other than the lock
/// acquisition itself.
#[derive(Default)]
pub struct MemoryStore {
    raw_events: RwLock<HashMap<RawEventId, RawEvent>>,
    dedupe_index: RwLock<HashMap<[u8; 32], RawEventId>>,
    offsets: RwLock<HashMap<(String, &'static str), IngestionOffset>>,
    repositories: RwLock<HashMap<RepositoryId, Repository>>,
    repositories_by_external: RwLock<HashMap<String, RepositoryId>>,
    commits: RwLock<HashMap<(RepositoryId, String), Commit>>,
    pull_requests: RwLock<HashMap<(RepositoryId, i64), PullRequest>>,
    issues: RwLock<HashMap<(RepositoryId, i64), Issue>>,
    doc_changes: RwLock<HashMap<(RepositoryId, String, String), DocumentationChange>>,
    event_facts: RwLock<Vec<EventFact>>,
    event_fact_index: RwLock<HashMap<(RepositoryId, String, i64), EventFactId>>,
    reports: RwLock<HashMap<ReportId, Report>>,
    report_coverage: RwLock<HashMap<ReportId, ReportCoverage>>,
    reviews: RwLock<HashMap<(RepositoryId, DateTime<Utc>, DateTime<Utc>), ReportReview>>,
    registry: RwLock<HashMap<String, RepositoryRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BronzeStore for MemoryStore {
    async fn ingest(&self, envelope: RawEventEnvelope) -> Result<RawEvent, GhStatusError> {
        let key = envelope.dedupe_key();
        let mut dedupe = self.dedupe_index.write().await;
        if let Some(existing_id) = dedupe.get(&key) {
            let raw_events = self.raw_events.read().await;
            return Ok(raw_events
                .get(existing_id)
                .cloned()
                .expect("dedupe index entry without a backing row"));
        }
        let row = RawEvent {
            id: RawEventId::new(),
            envelope,
            dedupe_key: key,
            ingested_at: Utc::now(),
            processing_state: ProcessingState::Unprocessed,
            processed_at: None,
        };
        dedupe.insert(key, row.id);
        self.raw_events.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_unprocessed(&self, limit: i64) -> Result<Vec<RawEvent>, GhStatusError> {
        let raw_events = self.raw_events.read().await;
        let mut rows: Vec<RawEvent> = raw_events
            .values()
            .filter(|e| e.is_unprocessed())
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.envelope
                .occurred_at
                .cmp(&b.envelope.occurred_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_processed(&self, id: RawEventId) -> Result<(), GhStatusError> {
        let mut raw_events = self.raw_events.write().await;
        let row = raw_events
            .get_mut(&id)
            .ok_or_else(|| GhStatusError::DataIntegrity(format!("unknown raw event {id}")))?;
        row.processing_state = ProcessingState::Processed;
        row.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: RawEventId, reason: &str) -> Result<(), GhStatusError> {
        let mut raw_events = self.raw_events.write().await;
        let row = raw_events
            .get_mut(&id)
            .ok_or_else(|| GhStatusError::DataIntegrity(format!("unknown raw event {id}")))?;
        row.processing_state = ProcessingState::Failed {
            reason: reason.to_string(),
        };
        row.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_offset(
        &self,
        repository_external_id: &str,
        stream_kind: StreamKind,
    ) -> Result<Option<IngestionOffset>, GhStatusError> {
        Ok(self
            .offsets
            .read()
            .await
            .get(&(repository_external_id.to_string(), stream_kind.as_str()))
            .cloned())
    }

    async fn put_offset(&self, offset: IngestionOffset) -> Result<(), GhStatusError> {
        let stream_kind = StreamKind::ALL
            .iter()
            .find(|k| k.as_str() == offset.stream_kind)
            .copied()
            .ok_or_else(|| {
                GhStatusError::DataIntegrity(format!("unknown stream kind {}", offset.stream_kind))
            })?;
        self.offsets
            .write()
            .await
            .insert((offset.repository_external_id.clone(), stream_kind.as_str()), offset);
        Ok(())
    }

    async fn list_offsets(&self) -> Result<Vec<IngestionOffset>, GhStatusError> {
        Ok(self.offsets.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn upsert_repository(&self, repository: Repository) -> Result<RepositoryId, GhStatusError> {
        let mut by_external = self.repositories_by_external.write().await;
        let mut repositories = self.repositories.write().await;
        if let Some(existing_id) = by_external.get(&repository.external_id).copied() {
            let existing = repositories
                .get_mut(&existing_id)
                .expect("repository index entry without a backing row");
            existing.owner = repository.owner;
            existing.name = repository.name;
            if repository.default_branch != "main" {
                existing.default_branch = repository.default_branch;
            }
            if !repository.documentation_paths.is_empty() {
                existing.documentation_paths = repository.documentation_paths;
            }
            if repository.last_seen_at > existing.last_seen_at {
                existing.last_seen_at = repository.last_seen_at;
            }
            return Ok(existing_id);
        }
        let id = repository.id;
        by_external.insert(repository.external_id.clone(), id);
        repositories.insert(id, repository);
        Ok(id)
    }

    async fn get_repository_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Repository>, GhStatusError> {
        let by_external = self.repositories_by_external.read().await;
        let repositories = self.repositories.read().await;
        Ok(by_external
            .get(external_id)
            .and_then(|id| repositories.get(id))
            .cloned())
    }

    async fn get_repository(&self, repository_id: RepositoryId) -> Result<Option<Repository>, GhStatusError> {
        Ok(self.repositories.read().await.get(&repository_id).cloned())
    }

    async fn get_repository_by_owner_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Repository>, GhStatusError> {
        Ok(self
            .repositories
            .read()
            .await
            .values()
            .find(|r| r.owner == owner && r.name == name)
            .cloned())
    }

    async fn upsert_commit(&self, commit: Commit) -> Result<(), GhStatusError> {
        self.commits
            .write()
            .await
            .insert((commit.repository_id, commit.sha.clone()), commit);
        Ok(())
    }

    async fn upsert_pull_request(&self, pull_request: PullRequest) -> Result<(), GhStatusError> {
        self.pull_requests
            .write()
            .await
            .insert((pull_request.repository_id, pull_request.number), pull_request);
        Ok(())
    }

    async fn upsert_issue(&self, issue: Issue) -> Result<(), GhStatusError> {
        self.issues
            .write()
            .await
            .insert((issue.repository_id, issue.number), issue);
        Ok(())
    }

    async fn upsert_documentation_change(
        &self,
        change: DocumentationChange,
    ) -> Result<(), GhStatusError> {
        self.doc_changes.write().await.insert(
            (
                change.repository_id,
                change.commit_sha.clone(),
                change.path.clone(),
            ),
            change,
        );
        Ok(())
    }

    async fn insert_event_fact(&self, fact: EventFact) -> Result<EventFactId, GhStatusError> {
        let natural_key = (
            fact.repository_id,
            fact.kind.clone(),
            fact.occurred_at.timestamp_nanos_opt().unwrap_or_default(),
        );
        let mut index = self.event_fact_index.write().await;
        if let Some(existing_id) = index.get(&natural_key) {
            return Ok(*existing_id);
        }
        index.insert(natural_key, fact.id);
        self.event_facts.write().await.push(fact.clone());
        Ok(fact.id)
    }

    async fn list_event_facts(
        &self,
        repository_id: RepositoryId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<EventFact>, GhStatusError> {
        let facts = self.event_facts.read().await;
        let mut matched: Vec<EventFact> = facts
            .iter()
            .filter(|f| {
                f.repository_id == repository_id
                    && f.occurred_at >= window_start
                    && f.occurred_at < window_end
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }
}

#[async_trait]
impl GoldStore for MemoryStore {
    async fn insert_report(
        &self,
        report: Report,
        coverage: ReportCoverage,
    ) -> Result<(), GhStatusError> {
        self.reports.write().await.insert(report.id, report);
        self.report_coverage
            .write()
            .await
            .insert(coverage.report_id, coverage);
        Ok(())
    }

    async fn latest_report(&self, repository_id: RepositoryId) -> Result<Option<Report>, GhStatusError> {
        let reports = self.reports.read().await;
        Ok(reports
            .values()
            .filter(|r| r.repository_id == repository_id)
            .max_by_key(|r| r.window_end)
            .cloned())
    }

    async fn recent_reports(
        &self,
        repository_id: RepositoryId,
        limit: i64,
    ) -> Result<Vec<Report>, GhStatusError> {
        let reports = self.reports.read().await;
        let mut matched: Vec<Report> = reports
            .values()
            .filter(|r| r.repository_id == repository_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.window_end.cmp(&a.window_end));
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, GhStatusError> {
        Ok(self.reports.read().await.get(&report_id).cloned())
    }

    async fn get_coverage(&self, report_id: ReportId) -> Result<Option<ReportCoverage>, GhStatusError> {
        Ok(self.report_coverage.read().await.get(&report_id).cloned())
    }

    async fn insert_review(&self, review: ReportReview) -> Result<(), GhStatusError> {
        self.reviews.write().await.insert(
            (review.repository_id, review.window_start, review.window_end),
            review,
        );
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn upsert(&self, record: RepositoryRecord) -> Result<(), GhStatusError> {
        self.registry
            .write()
            .await
            .insert(record.external_id.clone(), record);
        Ok(())
    }

    async fn set_ingestion_enabled(
        &self,
        external_id: &str,
        enabled: bool,
    ) -> Result<(), GhStatusError> {
        let mut registry = self.registry.write().await;
        let record = registry.get_mut(external_id).ok_or_else(|| {
            GhStatusError::UnknownRepository(external_id.to_string())
        })?;
        record.ingestion_enabled = enabled;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<RepositoryRecord>, GhStatusError> {
        Ok(self
            .registry
            .read()
            .await
            .values()
            .filter(|r| r.ingestion_enabled)
            .cloned()
            .collect())
    }

    async fn get(&self, external_id: &str) -> Result<Option<RepositoryRecord>, GhStatusError> {
        Ok(self.registry.read().await.get(external_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<RepositoryRecord>, GhStatusError> {
        Ok(self.registry.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_core::payload::PayloadValue;
    use serde_json::json;

    fn envelope(source_event_id: &str) -> RawEventEnvelope {
        RawEventEnvelope {
            source_system: "github".to_string(),
            event_type: "commit".to_string(),
            source_event_id: Some(source_event_id.to_string()),
            repo_external_id: Some("repo-1".to_string()),
            occurred_at: Utc::now(),
            payload: PayloadValue::from_json(&json!({"sha": "abc"})).unwrap(),
        }
    }

    #[tokio::test]
    async fn ingest_is_idempotent_on_dedupe_key() {
        let store = MemoryStore::new();
        let first = store.ingest(envelope("e1")).await.unwrap();
        let second = store.ingest(envelope("e1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_unprocessed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_processed_excludes_from_unprocessed_list() {
        let store = MemoryStore::new();
        let row = store.ingest(envelope("e1")).await.unwrap();
        store.mark_processed(row.id).await.unwrap();
        assert!(store.list_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_round_trip() {
        let store = MemoryStore::new();
        let record = RepositoryRecord {
            id: None,
            external_id: "gh:1".to_string(),
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            ingestion_enabled: true,
            catalogue_repository_id: None,
            registered_at: Utc::now(),
        };
        store.upsert(record).await.unwrap();
        assert_eq!(store.list_active().await.unwrap().len(), 1);
        store.set_ingestion_enabled("gh:1", false).await.unwrap();
        assert!(store.list_active().await.unwrap().is_empty());
    }
}

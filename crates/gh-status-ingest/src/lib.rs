#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-ingest** – the incremental ingestion worker.
//!
//! For each active repository, pulls every stream kind in a fixed order,
//! advancing a per-stream watermark/cursor and writing events into Bronze.
//! A run is bounded by `max_events_per_run`; when the budget is exhausted
//! mid-stream the worker persists the upstream pagination cursor and emits
//! [`IngestionEvent::StreamTruncated`] rather than silently dropping data.

use chrono::{DateTime, Utc};
use gh_status_core::error::GhStatusError;
use gh_status_core::registry::RepositoryRecord;
use gh_status_core::silver::IngestionOffset;
use gh_status_core::traits::{BronzeStore, StreamKind};
use gh_status_source::RemoteSource;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Why a run ended in failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    /// A remote 5xx or timeout; safe to retry later.
    Transient,
    /// A remote 4xx that will not resolve itself by retrying.
    ClientError,
    /// The upstream payload shape could not be parsed.
    SchemaDrift,
    /// Required configuration (credentials, base URL) was missing.
    Configuration,
    /// Bronze storage could not be reached.
    DatabaseConnectivity,
    /// A permanent failure: corrupted/inconsistent data, an unknown
    /// repository, or a validation failure. Retrying will not help; the
    /// caller must intervene.
    Permanent,
}

impl FailureCategory {
    fn classify(error: &GhStatusError) -> Self {
        match error {
            GhStatusError::Remote5xx(_) | GhStatusError::Timeout(_) => FailureCategory::Transient,
            GhStatusError::Remote4xx(_) => FailureCategory::ClientError,
            GhStatusError::UnsupportedPayloadType(_)
            | GhStatusError::InvalidTimestamp(_)
            | GhStatusError::SchemaDrift(_) => FailureCategory::SchemaDrift,
            GhStatusError::MissingConfig(_) => FailureCategory::Configuration,
            GhStatusError::DatabaseConnectivity(_) => FailureCategory::DatabaseConnectivity,
            GhStatusError::UnknownRepository(_)
            | GhStatusError::Drift(_)
            | GhStatusError::DataIntegrity(_)
            | GhStatusError::EvidenceEmpty
            | GhStatusError::ValidationFailed(_)
            | GhStatusError::Other(_) => FailureCategory::Permanent,
        }
    }
}

/// The outcome of one `run_for_repository` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every active stream was pulled to completion.
    Succeeded,
    /// At least one stream hit the event budget before exhausting its
    /// upstream pages; the pending cursor was persisted for the next run.
    Truncated,
    /// The run failed; no further streams for this repository were attempted.
    Failed(FailureCategory),
}

/// Live events emitted while ingestion runs, for observability and for
/// tests that assert on backpressure behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionEvent {
    /// A run began for a repository.
    RunStarted {
        /// The repository's external id.
        repository_external_id: String,
    },
    /// A stream's event budget was exhausted before its upstream pages were.
    StreamTruncated {
        /// The repository's external id.
        repository_external_id: String,
        /// Which stream was truncated.
        stream: &'static str,
    },
    /// A run finished.
    RunFinished {
        /// The repository's external id.
        repository_external_id: String,
        /// The run's outcome.
        outcome: RunOutcome,
    },
}

/// Pulls remote events into Bronze for every active repository.
pub struct IngestionWorker<B> {
    bronze: Arc<B>,
    source: Arc<dyn RemoteSource>,
    max_events_per_run: usize,
    events: broadcast::Sender<IngestionEvent>,
}

impl<B> IngestionWorker<B>
where
    B: BronzeStore,
{
    /// Build a worker over the given Bronze store and remote source.
    pub fn new(bronze: Arc<B>, source: Arc<dyn RemoteSource>, max_events_per_run: usize) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            bronze,
            source,
            max_events_per_run,
            events: tx,
        }
    }

    /// Subscribe to the live ingestion event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestionEvent> {
        self.events.subscribe()
    }

    /// Run one ingestion pass for a single repository across every stream
    /// kind, in the fixed order `StreamKind::ALL`.
    #[instrument(skip(self, repository), fields(repository_external_id = %repository.external_id))]
    pub async fn run_for_repository(&self, repository: &RepositoryRecord) -> RunOutcome {
        let _ = self.events.send(IngestionEvent::RunStarted {
            repository_external_id: repository.external_id.clone(),
        });
        info!("ingestion run started");

        let mut truncated = false;
        let mut budget_remaining = self.max_events_per_run;

        for stream in StreamKind::ALL {
            match self
                .run_stream(repository, stream, &mut budget_remaining)
                .await
            {
                Ok(stream_truncated) => {
                    truncated |= stream_truncated;
                    if budget_remaining == 0 {
                        break;
                    }
                }
                Err(error) => {
                    let category = FailureCategory::classify(&error);
                    warn!(%error, stream = stream.as_str(), "ingestion run failed");
                    let outcome = RunOutcome::Failed(category);
                    let _ = self.events.send(IngestionEvent::RunFinished {
                        repository_external_id: repository.external_id.clone(),
                        outcome: outcome.clone(),
                    });
                    return outcome;
                }
            }
        }

        let outcome = if truncated {
            RunOutcome::Truncated
        } else {
            RunOutcome::Succeeded
        };
        info!(?outcome, "ingestion run finished");
        let _ = self.events.send(IngestionEvent::RunFinished {
            repository_external_id: repository.external_id.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Pull one stream to completion or until `budget_remaining` hits zero.
    /// Returns whether the stream was truncated by the budget.
    async fn run_stream(
        &self,
        repository: &RepositoryRecord,
        stream: StreamKind,
        budget_remaining: &mut usize,
    ) -> Result<bool, GhStatusError> {
        let existing_offset = self
            .bronze
            .get_offset(&repository.external_id, stream)
            .await?;
        let mut watermark: DateTime<Utc> = existing_offset
            .as_ref()
            .map(|o| o.watermark)
            .unwrap_or(repository.registered_at);
        let mut cursor = existing_offset.and_then(|o| o.cursor);

        loop {
            if *budget_remaining == 0 {
                self.persist_offset(repository, stream, watermark, cursor)
                    .await?;
                let _ = self.events.send(IngestionEvent::StreamTruncated {
                    repository_external_id: repository.external_id.clone(),
                    stream: stream.as_str(),
                });
                return Ok(true);
            }

            let page = self
                .source
                .fetch_page(&repository.external_id, stream, watermark, cursor.clone())
                .await?;

            if page.events.is_empty() && page.next_cursor.is_none() {
                self.persist_offset(repository, stream, watermark, None).await?;
                return Ok(false);
            }

            for envelope in page.events {
                if *budget_remaining == 0 {
                    self.persist_offset(repository, stream, watermark, page.next_cursor.clone())
                        .await?;
                    let _ = self.events.send(IngestionEvent::StreamTruncated {
                        repository_external_id: repository.external_id.clone(),
                        stream: stream.as_str(),
                    });
                    return Ok(true);
                }
                if envelope.occurred_at > watermark {
                    watermark = envelope.occurred_at;
                }
                self.bronze.ingest(envelope).await?;
                *budget_remaining -= 1;
            }

            cursor = page.next_cursor;
            if cursor.is_none() {
                self.persist_offset(repository, stream, watermark, None).await?;
                return Ok(false);
            }
        }
    }

    async fn persist_offset(
        &self,
        repository: &RepositoryRecord,
        stream: StreamKind,
        watermark: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<(), GhStatusError> {
        self.bronze
            .put_offset(IngestionOffset {
                repository_external_id: repository.external_id.clone(),
                stream_kind: stream.as_str().to_string(),
                watermark,
                cursor,
                updated_at: Utc::now(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_core::payload::PayloadValue;
    use gh_status_core::raw_event::RawEventEnvelope;
    use gh_status_source::{FetchedPage, InMemoryRemoteSource};
    use gh_status_store_memory::MemoryStore;
    use serde_json::json;

    fn repository() -> RepositoryRecord {
        RepositoryRecord {
            id: None,
            external_id: "gh:1".to_string(),
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            ingestion_enabled: true,
            catalogue_repository_id: None,
            registered_at: Utc::now(),
        }
    }

    fn commit_envelope(sha: &str, occurred_at: DateTime<Utc>) -> RawEventEnvelope {
        RawEventEnvelope {
            source_system: "github".to_string(),
            event_type: "commit".to_string(),
            source_event_id: Some(sha.to_string()),
            repo_external_id: Some("gh:1".to_string()),
            occurred_at,
            payload: PayloadValue::from_json(&json!({"sha": sha})).unwrap(),
        }
    }

    #[tokio::test]
    async fn a_clean_run_ingests_every_page_and_advances_the_watermark() {
        let bronze = Arc::new(MemoryStore::new());
        let now = Utc::now();
        // Each stream kind consumes one page from the fixture queue, in order.
        let source = Arc::new(InMemoryRemoteSource::new(vec![
            FetchedPage {
                events: vec![commit_envelope("c1", now)],
                next_cursor: None,
            },
            FetchedPage {
                events: vec![],
                next_cursor: None,
            },
            FetchedPage {
                events: vec![],
                next_cursor: None,
            },
            FetchedPage {
                events: vec![],
                next_cursor: None,
            },
        ]));
        let worker = IngestionWorker::new(bronze.clone(), source, 100);

        let outcome = worker.run_for_repository(&repository()).await;
        assert_eq!(outcome, RunOutcome::Succeeded);
        assert_eq!(bronze.list_unprocessed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausting_the_budget_truncates_and_persists_a_cursor() {
        let bronze = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let source = Arc::new(InMemoryRemoteSource::new(vec![FetchedPage {
            events: vec![commit_envelope("c1", now), commit_envelope("c2", now)],
            next_cursor: Some("page-2".to_string()),
        }]));
        let worker = IngestionWorker::new(bronze.clone(), source, 1);

        let outcome = worker.run_for_repository(&repository()).await;
        assert_eq!(outcome, RunOutcome::Truncated);
        assert_eq!(bronze.list_unprocessed(10).await.unwrap().len(), 1);

        let offset = bronze
            .get_offset("gh:1", StreamKind::Commits)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offset.cursor.as_deref(), Some("page-2"));
    }

    #[tokio::test]
    async fn remote_5xx_is_classified_as_transient() {
        let bronze = Arc::new(MemoryStore::new());
        let source = Arc::new(InMemoryRemoteSource::new(vec![]));
        let worker = IngestionWorker::new(bronze, source, 10);

        let outcome = worker.run_for_repository(&repository()).await;
        assert_eq!(outcome, RunOutcome::Failed(FailureCategory::Transient));
    }
}

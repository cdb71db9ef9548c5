#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-api** – the on-demand reporting endpoint.
//!
//! [`handle_report_request`] is the core request-mapping logic: a plain
//! async function from `(owner, name)` to a [`ReportRequestOutcome`],
//! independent of any web framework. [`router`] adapts that function to a
//! thin `axum` router, mirroring `toka-orchestration-service`'s
//! `create_app`/handler split — binding sockets, TLS and readiness probes
//! remain outside this crate's scope.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use gh_status_core::error::GhStatusError;
use gh_status_core::report::{Report, ReportReview};
use gh_status_core::traits::{GoldStore, ProjectionStore};
use gh_status_orchestrator::{Orchestrator, ReportOutcome};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::instrument;

/// Token/latency metrics attached to a successful report response.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetrics {
    /// Wall-clock time spent in the status model call, in milliseconds.
    pub model_latency_ms: Option<u64>,
    /// Prompt tokens billed for the call, when reported.
    pub prompt_tokens: Option<u32>,
    /// Completion tokens billed for the call, when reported.
    pub completion_tokens: Option<u32>,
    /// Total tokens billed for the call, when reported.
    pub total_tokens: Option<u32>,
}

/// The 200-response body: a generated report's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Storage-assigned report id.
    pub report_id: String,
    /// `owner/name` of the reported repository.
    pub repository: String,
    /// Inclusive window start.
    pub window_start: chrono::DateTime<chrono::Utc>,
    /// Exclusive window end.
    pub window_end: chrono::DateTime<chrono::Utc>,
    /// When the report was generated.
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Coarse status signal, serialised as `on_track`/`at_risk`/`blocked`/`unknown`.
    pub status: gh_status_core::report::ReportStatus,
    /// Status model identifier that produced the report.
    pub model: String,
    /// Status model call metrics.
    pub metrics: ReportMetrics,
}

/// One failed validation rule, as surfaced in a 422 response.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssueBody {
    /// The rule that failed, e.g. `"empty_summary"`.
    pub code: String,
    /// A human-readable explanation.
    pub message: String,
}

/// The 422-response body for a report that exhausted its validation budget.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationFailureBody {
    /// A short human-readable title.
    pub title: String,
    /// A longer human-readable description.
    pub description: String,
    /// The persisted [`ReportReview`] id an operator can use to follow up.
    pub review_id: String,
    /// Every rule violated by the final draft.
    pub issues: Vec<ValidationIssueBody>,
}

/// The outcome of one on-demand report request, independent of HTTP.
#[derive(Debug, Clone)]
pub enum ReportRequestOutcome {
    /// A report was generated; maps to HTTP 200.
    Generated(ReportMetadata),
    /// The window had no uncovered evidence; maps to HTTP 204.
    NoEvidence,
    /// The repository is unknown to the registry; maps to HTTP 404.
    UnknownRepository,
    /// Validation was exhausted; maps to HTTP 422.
    ValidationFailed(ValidationFailureBody),
}

fn to_metadata(owner: &str, name: &str, report: &Report) -> ReportMetadata {
    ReportMetadata {
        report_id: report.id.to_string(),
        repository: format!("{owner}/{name}"),
        window_start: report.window_start,
        window_end: report.window_end,
        generated_at: report.generated_at,
        status: report.status,
        model: report.model.clone(),
        metrics: ReportMetrics {
            model_latency_ms: report.model_latency_ms,
            prompt_tokens: report.prompt_tokens,
            completion_tokens: report.completion_tokens,
            total_tokens: report.total_tokens,
        },
    }
}

fn to_failure_body(review: &ReportReview) -> ValidationFailureBody {
    ValidationFailureBody {
        title: "Report failed validation".to_string(),
        description: format!(
            "every draft for the window {} to {} failed validation and was recorded for review",
            review.window_start, review.window_end
        ),
        review_id: review.id.to_string(),
        issues: review
            .issues
            .iter()
            .map(|i| ValidationIssueBody {
                code: i.rule.clone(),
                message: i.detail.clone(),
            })
            .collect(),
    }
}

/// Map an on-demand report request for `(owner, name)` to an outcome,
/// independent of any web framework.
#[instrument(skip(silver, orchestrator))]
pub async fn handle_report_request<P, G>(
    silver: &P,
    orchestrator: &Orchestrator<P, G>,
    owner: &str,
    name: &str,
) -> Result<ReportRequestOutcome, GhStatusError>
where
    P: ProjectionStore,
    G: GoldStore,
{
    let repository = match silver.get_repository_by_owner_name(owner, name).await? {
        Some(repository) => repository,
        None => return Ok(ReportRequestOutcome::UnknownRepository),
    };

    match orchestrator.run_for_repository(repository.id).await? {
        ReportOutcome::Generated(report) => {
            Ok(ReportRequestOutcome::Generated(to_metadata(owner, name, &report)))
        }
        ReportOutcome::NoEvidence => Ok(ReportRequestOutcome::NoEvidence),
        ReportOutcome::ValidationFailed(review) => {
            Ok(ReportRequestOutcome::ValidationFailed(to_failure_body(&review)))
        }
    }
}

impl IntoResponse for ReportRequestOutcome {
    fn into_response(self) -> axum::response::Response {
        match self {
            ReportRequestOutcome::Generated(metadata) => (StatusCode::OK, Json(metadata)).into_response(),
            ReportRequestOutcome::NoEvidence => StatusCode::NO_CONTENT.into_response(),
            ReportRequestOutcome::UnknownRepository => StatusCode::NOT_FOUND.into_response(),
            ReportRequestOutcome::ValidationFailed(body) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
            }
        }
    }
}

/// Shared state for the thin HTTP surface.
#[derive(Clone)]
pub struct ApiState<P, G> {
    /// The Silver store, used to resolve `(owner, name)` to a repository id.
    pub silver: Arc<P>,
    /// The reporting orchestrator.
    pub orchestrator: Arc<Orchestrator<P, G>>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
}

async fn health() -> Json<StatusBody> {
    Json(StatusBody { status: "ok" })
}

async fn ready() -> Json<StatusBody> {
    Json(StatusBody { status: "ready" })
}

async fn post_report<P, G>(
    State(state): State<ApiState<P, G>>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<ReportRequestOutcome, StatusCode>
where
    P: ProjectionStore + Send + Sync + 'static,
    G: GoldStore + Send + Sync + 'static,
{
    handle_report_request(state.silver.as_ref(), state.orchestrator.as_ref(), &owner, &name)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Build the `axum` router: `POST /reports/repositories/{owner}/{name}`,
/// `GET /health`, `GET /ready`.
pub fn router<P, G>(state: ApiState<P, G>) -> Router
where
    P: ProjectionStore + Send + Sync + 'static,
    G: GoldStore + Send + Sync + 'static,
{
    Router::new()
        .route("/reports/repositories/:owner/:name", post(post_report::<P, G>))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gh_status_core::ids::{EventFactId, RepositoryId};
    use gh_status_core::silver::{EventFact, Repository};
    use gh_status_model::HeuristicProvider;
    use gh_status_model::StatusModel;
    use gh_status_orchestrator::OrchestratorConfig;
    use gh_status_store_memory::MemoryStore;

    async fn seeded_state() -> (ApiState<MemoryStore, MemoryStore>, RepositoryId) {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let repository_id = store
            .upsert_repository(Repository {
                id: RepositoryId::new(),
                external_id: "gh:1".to_string(),
                owner: "acme".to_string(),
                name: "widgets".to_string(),
                default_branch: "main".to_string(),
                documentation_paths: Vec::new(),
                ingestion_enabled: true,
                first_seen_at: now - chrono::Duration::days(10),
                last_seen_at: now,
            })
            .await
            .unwrap();
        store
            .insert_event_fact(EventFact {
                id: EventFactId::new(),
                repository_id,
                kind: "commit".to_string(),
                occurred_at: now,
                summary: "pushed a commit".to_string(),
            })
            .await
            .unwrap();

        let model = Arc::new(StatusModel::new(Arc::new(HeuristicProvider), 1000));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            store.clone(),
            model,
            None,
            OrchestratorConfig::default(),
        ));
        (ApiState { silver: store, orchestrator }, repository_id)
    }

    #[tokio::test]
    async fn unknown_repository_yields_not_found() {
        let (state, _) = seeded_state().await;
        let outcome = handle_report_request(state.silver.as_ref(), state.orchestrator.as_ref(), "nobody", "nothing")
            .await
            .unwrap();
        assert!(matches!(outcome, ReportRequestOutcome::UnknownRepository));
    }

    #[tokio::test]
    async fn fresh_evidence_yields_a_generated_report() {
        let (state, _) = seeded_state().await;
        let outcome = handle_report_request(state.silver.as_ref(), state.orchestrator.as_ref(), "acme", "widgets")
            .await
            .unwrap();
        match outcome {
            ReportRequestOutcome::Generated(metadata) => {
                assert_eq!(metadata.repository, "acme/widgets");
            }
            other => panic!("expected a generated report, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_second_immediate_request_has_no_new_evidence() {
        let (state, _) = seeded_state().await;
        handle_report_request(state.silver.as_ref(), state.orchestrator.as_ref(), "acme", "widgets")
            .await
            .unwrap();
        let outcome = handle_report_request(state.silver.as_ref(), state.orchestrator.as_ref(), "acme", "widgets")
            .await
            .unwrap();
        assert!(matches!(outcome, ReportRequestOutcome::NoEvidence));
    }
}

//! [`StatusModel`] – the hardened entry point wrapping a raw provider.

use crate::{sanitizer::RequestSanitizer, StatusModelProvider, StatusSummary, SummaryRequest};
use gh_status_core::error::GhStatusError;
use governor::{Quota, RateLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{info, instrument, warn};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Wraps a [`StatusModelProvider`] with rate limiting and request
/// sanitisation, so every backend gets the same guardrails regardless of
/// which one is plugged in. Response validation happens downstream, in the
/// orchestrator's validate/retry/review loop, not here: a hard failure at
/// the gateway would bypass that loop entirely.
pub struct StatusModel {
    provider: Arc<dyn StatusModelProvider>,
    limiter: Limiter,
    sanitizer: RequestSanitizer,
}

impl StatusModel {
    /// Build a gateway around `provider`, allowing at most `requests_per_minute`
    /// summarisation calls per minute.
    pub fn new(provider: Arc<dyn StatusModelProvider>, requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::new(1).expect("1 is non-zero")),
        );
        Self {
            provider,
            limiter: RateLimiter::direct(quota),
            sanitizer: RequestSanitizer,
        }
    }

    /// The identifier of the backend this gateway wraps.
    pub fn model_name(&self) -> String {
        self.provider.name()
    }

    /// Rate-limit, sanitise, then call the provider.
    #[instrument(skip(self, request), fields(repository = %request.repository_slug))]
    pub async fn summarize(&self, mut request: SummaryRequest) -> Result<StatusSummary, GhStatusError> {
        self.limiter.until_ready().await;

        self.sanitizer.sanitize(&mut request)?;

        let summary = self.provider.summarize(&request).await.map_err(|e| {
            warn!(error = %e, "status model provider call failed");
            e
        })?;

        info!(
            highlight_count = summary.highlights.len(),
            "status summary generated"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HeuristicProvider;
    use std::collections::BTreeMap;

    fn request() -> SummaryRequest {
        SummaryRequest {
            repository_slug: "acme/widgets".to_string(),
            window_start: chrono::Utc::now(),
            window_end: chrono::Utc::now(),
            fact_summaries: vec!["pushed commit abc".to_string()],
            work_type_counts: BTreeMap::new(),
            prior_narratives: vec![],
        }
    }

    #[tokio::test]
    async fn summarize_runs_sanitize_around_the_provider() {
        let gateway = StatusModel::new(Arc::new(HeuristicProvider), 60);
        let summary = gateway.summarize(request()).await.unwrap();
        assert!(!summary.summary_text.is_empty());
    }

    #[tokio::test]
    async fn empty_fact_summaries_fail_before_reaching_the_provider() {
        let gateway = StatusModel::new(Arc::new(HeuristicProvider), 60);
        let mut req = request();
        req.fact_summaries.clear();
        let err = gateway.summarize(req).await.unwrap_err();
        assert!(matches!(err, GhStatusError::EvidenceEmpty));
    }
}

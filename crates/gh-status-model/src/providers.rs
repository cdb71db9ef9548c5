//! Concrete [`StatusModelProvider`] backends.

use crate::{ReportStatus, StatusSummary, SummaryRequest, TokenUsage};
use async_trait::async_trait;
use gh_status_core::error::GhStatusError;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// The boundary every status model backend implements, whether it is a
/// deterministic heuristic or a remote chat-completion API.
#[async_trait]
pub trait StatusModelProvider: Send + Sync {
    /// A stable identifier for this backend, recorded alongside generated
    /// reports so operators can tell which model produced them.
    fn name(&self) -> String;

    /// Produce a summary for the given window of evidence.
    async fn summarize(&self, request: &SummaryRequest) -> Result<StatusSummary, GhStatusError>;
}

/// A deterministic backend with no external dependency, built entirely from
/// template rules over the fact summaries and work-type counts. Used as the
/// default backend and in tests, where a remote model's non-determinism
/// would make assertions brittle.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicProvider;

#[async_trait]
impl StatusModelProvider for HeuristicProvider {
    fn name(&self) -> String {
        "heuristic".to_string()
    }

    #[instrument(skip(self, request), fields(repository = %request.repository_slug))]
    async fn summarize(&self, request: &SummaryRequest) -> Result<StatusSummary, GhStatusError> {
        if request.fact_summaries.is_empty() {
            return Err(GhStatusError::EvidenceEmpty);
        }

        let mut counts: Vec<(String, usize)> = request
            .work_type_counts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let breakdown = counts
            .iter()
            .map(|(label, count)| format!("{count} {label}"))
            .collect::<Vec<_>>()
            .join(", ");

        let summary_text = format!(
            "Between {} and {}, {} recorded {} tracked events ({}).",
            request.window_start.date_naive(),
            request.window_end.date_naive(),
            request.repository_slug,
            request.fact_summaries.len(),
            breakdown,
        );

        let highlights = request.fact_summaries.iter().take(5).cloned().collect();

        Ok(StatusSummary {
            status: ReportStatus::OnTrack,
            summary_text,
            highlights,
            risks: Vec::new(),
            next_steps: Vec::new(),
            usage: None,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    status: ReportStatus,
    summary_text: String,
    #[serde(default)]
    highlights: Vec<String>,
    #[serde(default)]
    risks: Vec<String>,
    #[serde(default)]
    next_steps: Vec<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

/// A `reqwest`-backed provider that forwards the evidence to a remote
/// chat-completion-shaped API and expects back a status-summary-shaped
/// JSON body.
pub struct ChatCompletionProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
    model: String,
    max_tokens: u32,
}

impl ChatCompletionProvider {
    /// Build a provider against `base_url` using `model`, authenticating
    /// with `api_key`.
    pub fn new(base_url: impl Into<String>, api_key: Secret<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            max_tokens: 1024,
        }
    }

    /// Override the response token budget (default 1024).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(request: &SummaryRequest) -> String {
        let mut prompt = format!(
            "Summarise engineering activity for {} between {} and {}.\n",
            request.repository_slug, request.window_start, request.window_end
        );
        if !request.prior_narratives.is_empty() {
            prompt.push_str("Prior context:\n");
            for narrative in &request.prior_narratives {
                prompt.push_str("- ");
                prompt.push_str(narrative);
                prompt.push('\n');
            }
        }
        prompt.push_str("Events:\n");
        for summary in &request.fact_summaries {
            prompt.push_str("- ");
            prompt.push_str(summary);
            prompt.push('\n');
        }
        prompt.push_str(
            "Respond with a JSON object: {\"status\": \"on_track\"|\"at_risk\"|\"blocked\"|\"unknown\", \
             \"summary_text\": string, \"highlights\": string[], \"risks\": string[], \"next_steps\": string[]}.",
        );
        prompt
    }
}

#[async_trait]
impl StatusModelProvider for ChatCompletionProvider {
    fn name(&self) -> String {
        self.model.clone()
    }

    #[instrument(skip(self, request), fields(repository = %request.repository_slug))]
    async fn summarize(&self, request: &SummaryRequest) -> Result<StatusSummary, GhStatusError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: Self::build_prompt(request),
            }],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GhStatusError::Timeout(e.to_string())
                } else {
                    GhStatusError::Remote5xx(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GhStatusError::Remote5xx(format!("status model backend returned {status}")));
        }
        if status.is_client_error() {
            return Err(GhStatusError::Remote4xx(format!("status model backend returned {status}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GhStatusError::Remote5xx(format!("malformed status model response: {e}")))?;

        Ok(StatusSummary {
            status: parsed.status,
            summary_text: parsed.summary_text,
            highlights: parsed.highlights,
            risks: parsed.risks,
            next_steps: parsed.next_steps,
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request() -> SummaryRequest {
        let mut counts = BTreeMap::new();
        counts.insert("Code".to_string(), 3usize);
        counts.insert("Review".to_string(), 1usize);
        SummaryRequest {
            repository_slug: "acme/widgets".to_string(),
            window_start: chrono::Utc::now(),
            window_end: chrono::Utc::now(),
            fact_summaries: vec!["pushed commit abc".to_string(), "merged PR #3".to_string()],
            work_type_counts: counts,
            prior_narratives: vec![],
        }
    }

    #[tokio::test]
    async fn heuristic_provider_is_deterministic() {
        let req = request();
        let a = HeuristicProvider.summarize(&req).await.unwrap();
        let b = HeuristicProvider.summarize(&req).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn heuristic_provider_rejects_empty_evidence() {
        let mut req = request();
        req.fact_summaries.clear();
        let err = HeuristicProvider.summarize(&req).await.unwrap_err();
        assert!(matches!(err, GhStatusError::EvidenceEmpty));
    }
}

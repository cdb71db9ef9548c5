#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-source** – the remote GitHub event source boundary.
//!
//! The ingestion worker only ever talks to a [`RemoteSource`]; this crate
//! provides the concrete `reqwest`-backed [`GitHubRemoteSource`] and an
//! [`InMemoryRemoteSource`] test fake. Response classification (5xx vs 4xx
//! vs timeout) happens here, at the one place that actually makes the HTTP
//! call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gh_status_core::error::GhStatusError;
use gh_status_core::payload::PayloadValue;
use gh_status_core::raw_event::RawEventEnvelope;
use gh_status_core::traits::StreamKind;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};

/// One page of events pulled from an upstream stream.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Events in this page, in the order the upstream API returned them.
    pub events: Vec<RawEventEnvelope>,
    /// An opaque cursor into the next page, when the upstream API indicated
    /// there is more data beyond this page.
    pub next_cursor: Option<String>,
}

/// The boundary between the ingestion worker and whichever system actually
/// supplies GitHub-shaped events.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch one page of a repository's stream, starting from `since`
    /// (exclusive) or continuing from `cursor` if one was supplied.
    async fn fetch_page(
        &self,
        repo_external_id: &str,
        stream: StreamKind,
        since: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<FetchedPage, GhStatusError>;
}

#[derive(Debug, Deserialize)]
struct RawPageResponse {
    items: Vec<RawPageItem>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPageItem {
    source_event_id: Option<String>,
    occurred_at: String,
    payload: serde_json::Value,
}

/// A `reqwest`-backed [`RemoteSource`] talking to the GitHub REST API (or a
/// compatible shim in front of it).
pub struct GitHubRemoteSource {
    client: reqwest::Client,
    base_url: String,
    token: Secret<String>,
    request_timeout: Duration,
}

impl GitHubRemoteSource {
    /// Build a client against `base_url` (e.g. `https://api.github.com`)
    /// authenticating with `token`.
    pub fn new(base_url: impl Into<String>, token: Secret<String>) -> Result<Self, GhStatusError> {
        let client = reqwest::Client::builder()
            .user_agent("gh-status/0.1")
            .build()
            .map_err(|e| GhStatusError::MissingConfig(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
            request_timeout: Duration::from_secs(30),
        })
    }

    /// Override the per-request timeout (default 30s).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl RemoteSource for GitHubRemoteSource {
    #[instrument(skip(self, since, cursor), fields(repo_external_id, stream = stream.as_str()))]
    async fn fetch_page(
        &self,
        repo_external_id: &str,
        stream: StreamKind,
        since: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<FetchedPage, GhStatusError> {
        let url = format!(
            "{}/repos/{}/events/{}",
            self.base_url,
            repo_external_id,
            stream.as_str()
        );
        let mut request = self
            .client
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .query(&[("since", since.to_rfc3339())])
            .timeout(self.request_timeout);
        if let Some(cursor) = &cursor {
            request = request.query(&[("cursor", cursor.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GhStatusError::Timeout(format!("{repo_external_id}/{}: {e}", stream.as_str()))
            } else {
                GhStatusError::Remote5xx(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GhStatusError::Remote5xx(format!(
                "{repo_external_id}/{}: upstream returned {status}",
                stream.as_str()
            )));
        }
        if status.is_client_error() {
            return Err(GhStatusError::Remote4xx(format!(
                "{repo_external_id}/{}: upstream returned {status}",
                stream.as_str()
            )));
        }

        let body: RawPageResponse = response
            .json()
            .await
            .map_err(|e| GhStatusError::Remote5xx(format!("malformed upstream response: {e}")))?;

        let mut events = Vec::with_capacity(body.items.len());
        for item in body.items {
            let occurred_at = DateTime::parse_from_rfc3339(&item.occurred_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| GhStatusError::InvalidTimestamp(format!("{}: {e}", item.occurred_at)))?;
            let payload = PayloadValue::from_json(&item.payload)?;
            events.push(RawEventEnvelope {
                source_system: "github".to_string(),
                event_type: stream.event_type().to_string(),
                source_event_id: item.source_event_id,
                repo_external_id: Some(repo_external_id.to_string()),
                occurred_at,
                payload,
            });
        }

        Ok(FetchedPage {
            events,
            next_cursor: body.next_cursor,
        })
    }
}

/// A deterministic in-memory [`RemoteSource`] for tests: pages are supplied
/// up front and served back out in order, one per `fetch_page` call.
pub struct InMemoryRemoteSource {
    pages: std::sync::Mutex<std::collections::VecDeque<FetchedPage>>,
}

impl InMemoryRemoteSource {
    /// Build a fake source that serves `pages` in order, one per call to
    /// `fetch_page`, regardless of the requested repository or stream.
    pub fn new(pages: Vec<FetchedPage>) -> Self {
        Self {
            pages: std::sync::Mutex::new(pages.into()),
        }
    }
}

#[async_trait]
impl RemoteSource for InMemoryRemoteSource {
    async fn fetch_page(
        &self,
        _repo_external_id: &str,
        _stream: StreamKind,
        _since: DateTime<Utc>,
        _cursor: Option<String>,
    ) -> Result<FetchedPage, GhStatusError> {
        let mut pages = self.pages.lock().expect("poisoned lock");
        pages.pop_front().ok_or_else(|| {
            warn!("InMemoryRemoteSource exhausted its fixture pages");
            GhStatusError::Remote5xx("no more fixture pages".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_core::payload::PayloadValue;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_source_serves_pages_in_order() {
        let envelope = RawEventEnvelope {
            source_system: "github".to_string(),
            event_type: "commit".to_string(),
            source_event_id: Some("e1".to_string()),
            repo_external_id: Some("gh:1".to_string()),
            occurred_at: Utc::now(),
            payload: PayloadValue::from_json(&json!({"sha": "abc"})).unwrap(),
        };
        let source = InMemoryRemoteSource::new(vec![FetchedPage {
            events: vec![envelope],
            next_cursor: None,
        }]);

        let page = source
            .fetch_page("gh:1", StreamKind::Commits, Utc::now(), None)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert!(page.next_cursor.is_none());

        let err = source
            .fetch_page("gh:1", StreamKind::Commits, Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GhStatusError::Remote5xx(_)));
    }
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-model** – the pluggable status model interface.
//!
//! Mirrors the shape of an LLM gateway: a narrow [`StatusModelProvider`]
//! trait with two concrete backends (a deterministic heuristic and a
//! remote chat-completion API), wrapped by [`StatusModel`] which adds rate
//! limiting and request sanitisation uniformly regardless of which
//! provider is plugged in. Response validation is the orchestrator's job,
//! not this crate's: it runs inside the validate/retry/review loop so a
//! failed validation can trigger a retry instead of hard-failing the call.

pub mod gateway;
pub mod providers;
pub mod sanitizer;

pub use gateway::StatusModel;
pub use providers::{ChatCompletionProvider, HeuristicProvider, StatusModelProvider};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use gh_status_core::report::ReportStatus;

/// Maximum number of fact summaries forwarded into a single request.
pub const MAX_FACT_SUMMARIES: usize = 200;

/// The input to a single summarisation call: everything the provider needs
/// to produce a [`StatusSummary`], already shaped by the evidence builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// `owner/name` of the repository being summarised.
    pub repository_slug: String,
    /// Inclusive start of the window being summarised.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the window being summarised.
    pub window_end: DateTime<Utc>,
    /// Human-readable fact summaries, in their canonical order.
    pub fact_summaries: Vec<String>,
    /// Counts of facts per work-type label (`"Code"`, `"Review"`, ...).
    pub work_type_counts: BTreeMap<String, usize>,
    /// Narratives from the immediately preceding reports, newest first, for
    /// continuity.
    pub prior_narratives: Vec<String>,
}

/// Token accounting for a remote status model call, when the backend
/// reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens spent on the prompt.
    pub prompt_tokens: u32,
    /// Tokens spent on the completion.
    pub completion_tokens: u32,
    /// Total tokens billed for the call.
    pub total_tokens: u32,
}

/// A generated status summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Coarse health signal for the window.
    pub status: ReportStatus,
    /// The prose summary of the window's activity.
    pub summary_text: String,
    /// A short list of the most notable items.
    pub highlights: Vec<String>,
    /// Risks called out for the window.
    pub risks: Vec<String>,
    /// Suggested next steps.
    pub next_steps: Vec<String>,
    /// Token usage, when the backend reports it.
    pub usage: Option<TokenUsage>,
}

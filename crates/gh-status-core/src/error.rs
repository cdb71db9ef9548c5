//! The shared error taxonomy.
//!
//! Every layer of the pipeline classifies its failures into this one enum
//! so that the ingestion worker, the orchestrator, and the HTTP surface can
//! all reason about retryability and status-code mapping from the same
//! vocabulary instead of inventing per-crate categories.

use thiserror::Error;

/// Errors shared across the ingestion, projection and reporting pipeline.
#[derive(Debug, Error)]
pub enum GhStatusError {
    /// A payload carried a naive (no offset) or otherwise unparsable timestamp.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A payload value could not be normalised into the closed canonical set.
    #[error("unsupported payload type: {0}")]
    UnsupportedPayloadType(String),

    /// An event referenced a repository the registry has no record of.
    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    /// The remote GitHub source responded with a 5xx.
    #[error("remote server error: {0}")]
    Remote5xx(String),

    /// The remote GitHub source responded with a non-retryable 4xx.
    #[error("remote client error: {0}")]
    Remote4xx(String),

    /// A call to the remote source or model backend exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The storage layer could not be reached or a query failed at the
    /// transport level.
    #[error("database connectivity error: {0}")]
    DatabaseConnectivity(String),

    /// Projection detected that a previously-projected entity changed in an
    /// incompatible way under replay.
    #[error("schema drift: {0}")]
    SchemaDrift(String),

    /// Projection detected non-deterministic output for an event that was
    /// already projected once before.
    #[error("projection drift: {0}")]
    Drift(String),

    /// A stored invariant was violated in a way that indicates corrupted or
    /// inconsistent data rather than a transient fault.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Required configuration was missing or invalid at startup.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// An evidence bundle had no facts to report on.
    #[error("evidence bundle is empty")]
    EvidenceEmpty,

    /// A generated report failed validation after exhausting all retries.
    #[error("report failed validation: {0:?}")]
    ValidationFailed(Vec<String>),

    /// Catch-all for errors that do not fit the taxonomy above, always
    /// carrying the original cause for diagnostics.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GhStatusError {
    /// Whether retrying the operation that produced this error is plausibly
    /// useful (transient faults) as opposed to requiring operator or code
    /// intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GhStatusError::Remote5xx(_)
                | GhStatusError::Timeout(_)
                | GhStatusError::DatabaseConnectivity(_)
        )
    }
}

//! The Bronze layer: raw, append-only event records.

use crate::hashing::dedupe_key;
use crate::ids::RawEventId;
use crate::payload::PayloadValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The state of an ingested raw event with respect to Silver projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessingState {
    /// Not yet projected.
    Unprocessed,
    /// Projected into Silver successfully.
    Processed,
    /// Projection was attempted and rejected; the reason is one of the
    /// shared error taxonomy categories (most commonly `DRIFT` or
    /// `SCHEMA_DRIFT`). Silver is left untouched when this state is set.
    Failed {
        /// Why projection was rejected.
        reason: String,
    },
}

/// An event as submitted by an ingestion run, before it has been assigned
/// an id or a dedupe key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventEnvelope {
    /// The upstream system the event came from, e.g. `"github"`.
    pub source_system: String,
    /// The event's kind, e.g. `"push"`, `"pull_request"`, `"issues"`.
    pub event_type: String,
    /// The upstream system's own id for this event, when it has one.
    pub source_event_id: Option<String>,
    /// The external (upstream) repository identifier the event concerns.
    pub repo_external_id: Option<String>,
    /// When the event occurred, per the upstream system.
    pub occurred_at: DateTime<Utc>,
    /// The event body, already normalised into the canonical payload shape.
    pub payload: PayloadValue,
}

impl RawEventEnvelope {
    /// Compute the dedupe key this envelope would be stored under.
    pub fn dedupe_key(&self) -> [u8; 32] {
        dedupe_key(
            &self.source_system,
            &self.event_type,
            self.source_event_id.as_deref(),
            self.repo_external_id.as_deref(),
            self.occurred_at,
            &self.payload,
        )
    }
}

/// A raw event as persisted in the Bronze store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Storage-assigned identifier.
    pub id: RawEventId,
    /// The envelope this row was ingested from.
    pub envelope: RawEventEnvelope,
    /// SHA-256 dedupe key, unique per logical occurrence.
    pub dedupe_key: [u8; 32],
    /// When this row was written to Bronze (distinct from `occurred_at`).
    pub ingested_at: DateTime<Utc>,
    /// Projection state.
    pub processing_state: ProcessingState,
    /// When projection last attempted this event, if ever.
    pub processed_at: Option<DateTime<Utc>>,
}

impl RawEvent {
    /// Whether this event still needs to be projected into Silver.
    pub fn is_unprocessed(&self) -> bool {
        matches!(self.processing_state, ProcessingState::Unprocessed)
    }
}

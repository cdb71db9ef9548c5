//! The repository registry record: which repositories the pipeline should
//! ingest from, independent of whether they have been observed in Bronze yet.

use crate::ids::RepositoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository enrolled in (or removed from) active ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    /// Storage-assigned identifier. `None` until the repository has been
    /// projected at least once; the registry may enroll repositories ahead
    /// of their first observed event.
    pub id: Option<RepositoryId>,
    /// The external id used by the source system.
    pub external_id: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Whether ingestion is currently enabled for this repository.
    pub ingestion_enabled: bool,
    /// The catalogue's own identifier for this repository, when it was
    /// enrolled (or last seen) via `sync_from_catalogue`. Cleared when the
    /// repository is removed from the catalogue.
    pub catalogue_repository_id: Option<String>,
    /// When this record was added to the registry.
    pub registered_at: DateTime<Utc>,
}

impl RepositoryRecord {
    /// `owner/name`, used as the natural key when syncing from a catalogue.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

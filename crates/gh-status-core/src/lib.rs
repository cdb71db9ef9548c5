#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-core** – shared domain types for the gh-status reporting pipeline.
//!
//! This crate sits at the deterministic core of the estate-level status
//! pipeline: it owns the Bronze/Silver/Gold data model, the canonical
//! payload hashing used for ingestion dedup, and the storage-trait
//! boundaries that every concrete backend (SQLite, in-memory) implements.
//! Nothing in this crate performs I/O.

pub mod error;
pub mod hashing;
pub mod ids;
pub mod payload;
pub mod raw_event;
pub mod registry;
pub mod report;
pub mod silver;
pub mod traits;

pub mod prelude {
    //! Re-exports of the most commonly used types.
    pub use crate::error::GhStatusError;
    pub use crate::ids::*;
    pub use crate::payload::PayloadValue;
    pub use crate::raw_event::{ProcessingState, RawEvent, RawEventEnvelope};
    pub use crate::registry::RepositoryRecord;
    pub use crate::report::{Report, ReportCoverage, ReportReview, ReportScope, ValidationIssue};
    pub use crate::silver::{
        Commit, DocumentationChange, EventFact, IngestionOffset, Issue, PullRequest, Repository,
    };
    pub use crate::traits::{
        BronzeStore, GoldStore, ProjectionStore, RegistryStore, StreamKind,
    };
}

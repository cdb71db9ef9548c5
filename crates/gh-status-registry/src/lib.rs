#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-registry** – which repositories are enrolled for ingestion.
//!
//! The registry itself never talks to an external catalogue directly; it is
//! driven by a [`CatalogueSource`] the caller supplies, so that loading
//! catalogue data (from YAML, an API, or a test fixture) stays out of this
//! crate's scope.

use async_trait::async_trait;
use chrono::Utc;
use gh_status_core::error::GhStatusError;
use gh_status_core::registry::RepositoryRecord;
use gh_status_core::traits::RegistryStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// One entry in an external repository catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry {
    /// The source system's external identifier.
    pub external_id: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

/// A source of repository catalogue entries. Kept deliberately abstract so
/// that loading the catalogue from YAML, an API, or a database lives
/// outside this crate.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    /// List every repository the catalogue currently knows about.
    async fn list(&self) -> Result<Vec<CatalogueEntry>, GhStatusError>;
}

/// Summary of a `sync_from_catalogue` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Newly registered repositories.
    pub added: usize,
    /// Existing registrations refreshed with catalogue data.
    pub updated: usize,
    /// Registrations no longer present in the catalogue, disabled and
    /// unlinked.
    pub disabled: usize,
}

/// The repository registry, backed by a [`RegistryStore`].
pub struct Registry<S> {
    store: Arc<S>,
}

impl<S: RegistryStore> Registry<S> {
    /// Build a registry over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Reconcile the registry against a catalogue. Repositories present in
    /// the catalogue are upserted with `ingestion_enabled` forced to `true`
    /// and `catalogue_repository_id` linked, even if they were previously
    /// disabled by hand. Repositories that were linked to this catalogue on
    /// a prior sync but are no longer present in it keep their row, but have
    /// `ingestion_enabled` set to `false` and `catalogue_repository_id`
    /// cleared.
    #[instrument(skip(self, source))]
    pub async fn sync_from_catalogue(
        &self,
        source: &dyn CatalogueSource,
    ) -> Result<SyncSummary, GhStatusError> {
        let entries = source.list().await?;

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.external_id.clone()) {
                return Err(GhStatusError::DataIntegrity(format!(
                    "duplicate catalogue entry for external id {}",
                    entry.external_id
                )));
            }
        }

        let mut summary = SyncSummary::default();
        for entry in entries {
            let existing = self.store.get(&entry.external_id).await?;
            let registered_at = existing
                .as_ref()
                .map(|r| r.registered_at)
                .unwrap_or_else(Utc::now);
            let id = existing.as_ref().and_then(|r| r.id);

            self.store
                .upsert(RepositoryRecord {
                    id,
                    external_id: entry.external_id.clone(),
                    owner: entry.owner,
                    name: entry.name,
                    ingestion_enabled: true,
                    catalogue_repository_id: Some(entry.external_id),
                    registered_at,
                })
                .await?;

            if existing.is_none() {
                summary.added += 1;
            } else {
                summary.updated += 1;
            }
        }

        for record in self.store.list_all().await? {
            if seen.contains(&record.external_id) || record.catalogue_repository_id.is_none() {
                continue;
            }
            self.store
                .upsert(RepositoryRecord {
                    ingestion_enabled: false,
                    catalogue_repository_id: None,
                    ..record
                })
                .await?;
            summary.disabled += 1;
        }

        info!(
            added = summary.added,
            updated = summary.updated,
            disabled = summary.disabled,
            "registry synced"
        );
        Ok(summary)
    }

    /// Enable ingestion for a registered repository.
    pub async fn enable_ingestion(&self, external_id: &str) -> Result<(), GhStatusError> {
        self.store.set_ingestion_enabled(external_id, true).await
    }

    /// Disable ingestion for a registered repository.
    pub async fn disable_ingestion(&self, external_id: &str) -> Result<(), GhStatusError> {
        self.store.set_ingestion_enabled(external_id, false).await
    }

    /// List every repository currently enabled for ingestion.
    pub async fn list_active(&self) -> Result<Vec<RepositoryRecord>, GhStatusError> {
        self.store.list_active().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_store_memory::MemoryStore;

    struct FixtureCatalogue(Vec<CatalogueEntry>);

    #[async_trait]
    impl CatalogueSource for FixtureCatalogue {
        async fn list(&self) -> Result<Vec<CatalogueEntry>, GhStatusError> {
            Ok(self.0.clone())
        }
    }

    fn entry(id: &str) -> CatalogueEntry {
        CatalogueEntry {
            external_id: id.to_string(),
            owner: "acme".to_string(),
            name: id.to_string(),
        }
    }

    #[tokio::test]
    async fn sync_adds_new_repositories_enabled_by_default() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let catalogue = FixtureCatalogue(vec![entry("widgets"), entry("gadgets")]);
        let summary = registry.sync_from_catalogue(&catalogue).await.unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(registry.list_active().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resyncing_a_catalogue_still_listing_a_repository_re_enables_it() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let catalogue = FixtureCatalogue(vec![entry("widgets")]);
        registry.sync_from_catalogue(&catalogue).await.unwrap();
        registry.disable_ingestion("widgets").await.unwrap();
        assert!(registry.list_active().await.unwrap().is_empty());

        let summary = registry.sync_from_catalogue(&catalogue).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(registry.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_repository_removed_from_the_catalogue_is_disabled_and_unlinked() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(store.clone());
        let full_catalogue = FixtureCatalogue(vec![entry("widgets"), entry("gadgets")]);
        registry.sync_from_catalogue(&full_catalogue).await.unwrap();

        let shrunk_catalogue = FixtureCatalogue(vec![entry("widgets")]);
        let summary = registry.sync_from_catalogue(&shrunk_catalogue).await.unwrap();
        assert_eq!(summary.disabled, 1);

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].external_id, "widgets");

        let gadgets = store.get("gadgets").await.unwrap().unwrap();
        assert!(!gadgets.ingestion_enabled);
        assert!(gadgets.catalogue_repository_id.is_none());
    }

    #[tokio::test]
    async fn duplicate_catalogue_entries_are_rejected() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let catalogue = FixtureCatalogue(vec![entry("widgets"), entry("widgets")]);
        let err = registry.sync_from_catalogue(&catalogue).await.unwrap_err();
        assert!(matches!(err, GhStatusError::DataIntegrity(_)));
    }
}

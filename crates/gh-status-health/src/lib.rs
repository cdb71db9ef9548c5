#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-health** – ingestion lag and stall detection derived purely
//! from `IngestionOffset` watermarks, with no additional storage of its
//! own.

use chrono::{DateTime, Duration, Utc};
use gh_status_core::error::GhStatusError;
use gh_status_core::traits::{BronzeStore, RegistryStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Default staleness threshold before a repository is considered stalled.
pub const DEFAULT_STALLED_THRESHOLD_SECONDS: u64 = 3600;

/// Lag and cursor state for a single repository, aggregated across all its
/// streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLag {
    /// The source system's external repository id.
    pub repository_external_id: String,
    /// Seconds since the most recently advanced watermark across all streams.
    pub time_since_last_ingestion_seconds: u64,
    /// Seconds since the least recently advanced watermark across all streams.
    pub oldest_watermark_age_seconds: u64,
    /// Whether any stream has a pending (non-exhausted) pagination cursor.
    pub has_pending_cursors: bool,
    /// True when this repository is active in the registry but has no
    /// `IngestionOffset` row at all, i.e. it has never been ingested.
    pub never_ingested: bool,
    /// Whether this repository exceeds the configured stall threshold, or
    /// has never been ingested.
    pub is_stalled: bool,
}

/// Computes per-repository ingestion lag from a [`BronzeStore`]'s tracked
/// offsets, cross-referenced against a [`RegistryStore`] so that active
/// repositories with no offsets at all are flagged as never ingested rather
/// than silently omitted.
pub struct HealthService<B, R> {
    bronze: Arc<B>,
    registry: Arc<R>,
    stalled_threshold: Duration,
}

impl<B, R> HealthService<B, R>
where
    B: BronzeStore,
    R: RegistryStore,
{
    /// Build a health service reading offsets from `bronze` and active
    /// repositories from `registry`, treating a repository as stalled once
    /// its lag exceeds `stalled_threshold_seconds` or it has never been
    /// ingested at all.
    pub fn new(bronze: Arc<B>, registry: Arc<R>, stalled_threshold_seconds: u64) -> Self {
        Self {
            bronze,
            registry,
            stalled_threshold: Duration::seconds(stalled_threshold_seconds as i64),
        }
    }

    /// Lag for every repository with at least one tracked offset, plus every
    /// active registry repository that has none, keyed by external id.
    pub async fn lag_by_repository(&self) -> Result<HashMap<String, RepositoryLag>, GhStatusError> {
        let offsets = self.bronze.list_offsets().await?;
        let now = Utc::now();

        let mut by_repo: HashMap<String, (DateTime<Utc>, DateTime<Utc>, bool)> = HashMap::new();
        for offset in offsets {
            let entry = by_repo
                .entry(offset.repository_external_id.clone())
                .or_insert((offset.watermark, offset.watermark, false));
            if offset.watermark > entry.0 {
                entry.0 = offset.watermark;
            }
            if offset.watermark < entry.1 {
                entry.1 = offset.watermark;
            }
            entry.2 |= offset.has_pending_cursor();
        }

        let mut result: HashMap<String, RepositoryLag> = by_repo
            .into_iter()
            .map(|(repository_external_id, (newest, oldest, has_pending_cursors))| {
                let time_since_last = (now - newest).num_seconds().max(0) as u64;
                let oldest_age = (now - oldest).num_seconds().max(0) as u64;
                let is_stalled = now - newest > self.stalled_threshold;
                (
                    repository_external_id.clone(),
                    RepositoryLag {
                        repository_external_id,
                        time_since_last_ingestion_seconds: time_since_last,
                        oldest_watermark_age_seconds: oldest_age,
                        has_pending_cursors,
                        never_ingested: false,
                        is_stalled,
                    },
                )
            })
            .collect();

        for record in self.registry.list_active().await? {
            result.entry(record.external_id.clone()).or_insert(RepositoryLag {
                repository_external_id: record.external_id,
                time_since_last_ingestion_seconds: 0,
                oldest_watermark_age_seconds: 0,
                has_pending_cursors: false,
                never_ingested: true,
                is_stalled: true,
            });
        }

        Ok(result)
    }

    /// The subset of [`lag_by_repository`] whose `is_stalled` is true.
    pub async fn get_stalled_repositories(&self) -> Result<Vec<RepositoryLag>, GhStatusError> {
        let mut stalled: Vec<RepositoryLag> = self
            .lag_by_repository()
            .await?
            .into_values()
            .filter(|lag| lag.is_stalled)
            .collect();
        stalled.sort_by(|a, b| a.repository_external_id.cmp(&b.repository_external_id));
        Ok(stalled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use gh_status_core::silver::IngestionOffset;
    use gh_status_core::traits::StreamKind;
    use gh_status_store_memory::MemoryStore;

    fn offset(repo: &str, stream: StreamKind, watermark: DateTime<Utc>, cursor: Option<&str>) -> IngestionOffset {
        IngestionOffset {
            repository_external_id: repo.to_string(),
            stream_kind: stream.as_str().to_string(),
            watermark,
            cursor: cursor.map(str::to_string),
            updated_at: watermark,
        }
    }

    #[tokio::test]
    async fn a_repository_with_no_recent_ingestion_is_stalled() {
        let store = Arc::new(MemoryStore::new());
        let stale = Utc::now() - ChronoDuration::hours(3);
        store.put_offset(offset("gh:1", StreamKind::Commits, stale, None)).await.unwrap();

        let health = HealthService::new(store.clone(), store, 3600);
        let stalled = health.get_stalled_repositories().await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].repository_external_id, "gh:1");
    }

    #[tokio::test]
    async fn a_recently_ingested_repository_is_not_stalled() {
        let store = Arc::new(MemoryStore::new());
        store.put_offset(offset("gh:1", StreamKind::Commits, Utc::now(), None)).await.unwrap();

        let health = HealthService::new(store.clone(), store, 3600);
        let stalled = health.get_stalled_repositories().await.unwrap();
        assert!(stalled.is_empty());
    }

    #[tokio::test]
    async fn pending_cursor_on_any_stream_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.put_offset(offset("gh:1", StreamKind::Commits, now, Some("cursor-a"))).await.unwrap();
        store.put_offset(offset("gh:1", StreamKind::Issues, now, None)).await.unwrap();

        let health = HealthService::new(store.clone(), store, 3600);
        let lag = health.lag_by_repository().await.unwrap();
        assert!(lag["gh:1"].has_pending_cursors);
    }

    #[tokio::test]
    async fn an_active_repository_with_no_offsets_is_flagged_never_ingested() {
        use gh_status_core::registry::RepositoryRecord;

        let store = Arc::new(MemoryStore::new());
        store
            .upsert(RepositoryRecord {
                id: None,
                external_id: "gh:2".to_string(),
                owner: "acme".to_string(),
                name: "gadgets".to_string(),
                ingestion_enabled: true,
                catalogue_repository_id: None,
                registered_at: Utc::now(),
            })
            .await
            .unwrap();

        let health = HealthService::new(store.clone(), store, 3600);
        let stalled = health.get_stalled_repositories().await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].repository_external_id, "gh:2");
        assert!(stalled[0].never_ingested);
    }
}

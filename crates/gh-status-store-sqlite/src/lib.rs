#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-store-sqlite** – SQLite-backed implementation of every
//! gh-status-core storage trait.
//!
//! Follows the same shape as other SQLite-backed stores in this workspace
//! family: a pool, a `migrate()` that creates `STRICT` tables with
//! `IF NOT EXISTS`, and one `impl` block per storage trait using explicit
//! transactions for multi-statement writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gh_status_core::error::GhStatusError;
use gh_status_core::ids::{
    EventFactId, RawEventId, ReportId, ReportReviewId, RepositoryId,
};
use gh_status_core::payload::PayloadValue;
use gh_status_core::raw_event::{ProcessingState, RawEvent, RawEventEnvelope};
use gh_status_core::registry::RepositoryRecord;
use gh_status_core::report::{
    Report, ReportCoverage, ReportReview, ReportScope, ReportStatus, ReviewState, ValidationIssue,
};
use gh_status_core::silver::{
    Commit, DocumentationChange, EventFact, IngestionOffset, Issue, IssueState, PullRequest,
    PullRequestState, Repository,
};
use gh_status_core::traits::{BronzeStore, GoldStore, ProjectionStore, RegistryStore, StreamKind};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

fn db_err(e: sqlx::Error) -> GhStatusError {
    GhStatusError::DatabaseConnectivity(e.to_string())
}

fn parse_dt(raw: &str) -> Result<DateTime<Utc>, GhStatusError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GhStatusError::DataIntegrity(format!("corrupt timestamp {raw}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<uuid::Uuid, GhStatusError> {
    uuid::Uuid::from_str(raw)
        .map_err(|e| GhStatusError::DataIntegrity(format!("corrupt id {raw}: {e}")))
}

/// A SQLite-backed store implementing the Bronze, Silver, Gold and registry
/// traits against a single database file (or in-memory database for tests).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if necessary) a SQLite database file and run migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, GhStatusError> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a private in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, GhStatusError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an already-configured pool. The caller is responsible for having
    /// run [`SqliteStore::migrate`] on it at least once.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create every table this store needs, if it does not already exist.
    pub async fn migrate(&self) -> Result<(), GhStatusError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_events (
                id TEXT PRIMARY KEY,
                source_system TEXT NOT NULL,
                event_type TEXT NOT NULL,
                source_event_id TEXT,
                repo_external_id TEXT,
                occurred_at TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                dedupe_key TEXT NOT NULL UNIQUE,
                ingested_at TEXT NOT NULL,
                processing_state TEXT NOT NULL,
                processing_reason TEXT,
                processed_at TEXT
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_events_unprocessed ON raw_events(processing_state, occurred_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_offsets (
                repository_external_id TEXT NOT NULL,
                stream_kind TEXT NOT NULL,
                watermark TEXT NOT NULL,
                cursor TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (repository_external_id, stream_kind)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                default_branch TEXT NOT NULL,
                documentation_paths_json TEXT NOT NULL,
                ingestion_enabled INTEGER NOT NULL,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commits (
                repository_id TEXT NOT NULL,
                sha TEXT NOT NULL,
                message TEXT NOT NULL,
                author TEXT NOT NULL,
                authored_at TEXT NOT NULL,
                changed_paths_json TEXT NOT NULL,
                PRIMARY KEY (repository_id, sha)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pull_requests (
                repository_id TEXT NOT NULL,
                number INTEGER NOT NULL,
                title TEXT NOT NULL,
                state TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                author TEXT NOT NULL,
                PRIMARY KEY (repository_id, number)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issues (
                repository_id TEXT NOT NULL,
                number INTEGER NOT NULL,
                title TEXT NOT NULL,
                state TEXT NOT NULL,
                labels_json TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                PRIMARY KEY (repository_id, number)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documentation_changes (
                repository_id TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                path TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                PRIMARY KEY (repository_id, commit_sha, path)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_facts (
                id TEXT PRIMARY KEY,
                repository_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                summary TEXT NOT NULL,
                natural_key TEXT NOT NULL UNIQUE
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_event_facts_window ON event_facts(repository_id, occurred_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                repository_id TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL,
                model TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                validation_attempts INTEGER NOT NULL,
                model_latency_ms INTEGER,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS report_coverage (
                report_id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                repository_id TEXT NOT NULL,
                fact_ids_json TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS report_reviews (
                id TEXT PRIMARY KEY,
                repository_id TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                last_draft TEXT NOT NULL,
                issues_json TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (repository_id, window_start, window_end)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registry (
                external_id TEXT PRIMARY KEY,
                id TEXT,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                ingestion_enabled INTEGER NOT NULL,
                catalogue_repository_id TEXT,
                registered_at TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn processing_state_to_columns(state: &ProcessingState) -> (&'static str, Option<&str>) {
    match state {
        ProcessingState::Unprocessed => ("unprocessed", None),
        ProcessingState::Processed => ("processed", None),
        ProcessingState::Failed { reason } => ("failed", Some(reason.as_str())),
    }
}

fn row_to_repository(row: sqlx::sqlite::SqliteRow) -> Result<Repository, GhStatusError> {
    let id_str: String = row.try_get("id").map_err(db_err)?;
    let first_seen_at: String = row.try_get("first_seen_at").map_err(db_err)?;
    let last_seen_at: String = row.try_get("last_seen_at").map_err(db_err)?;
    let documentation_paths_json: String = row.try_get("documentation_paths_json").map_err(db_err)?;
    let documentation_paths: Vec<String> = serde_json::from_str(&documentation_paths_json)
        .map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
    let ingestion_enabled: i64 = row.try_get("ingestion_enabled").map_err(db_err)?;
    Ok(Repository {
        id: RepositoryId::from_uuid(parse_uuid(&id_str)?),
        external_id: row.try_get("external_id").map_err(db_err)?,
        owner: row.try_get("owner").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        default_branch: row.try_get("default_branch").map_err(db_err)?,
        documentation_paths,
        ingestion_enabled: ingestion_enabled != 0,
        first_seen_at: parse_dt(&first_seen_at)?,
        last_seen_at: parse_dt(&last_seen_at)?,
    })
}

fn row_to_raw_event(row: &sqlx::sqlite::SqliteRow) -> Result<RawEvent, GhStatusError> {
    let id_str: String = row.try_get("id").map_err(db_err)?;
    let payload_json: String = row.try_get("payload_json").map_err(db_err)?;
    let payload: PayloadValue =
        serde_json::from_str(&payload_json).map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
    let occurred_at: String = row.try_get("occurred_at").map_err(db_err)?;
    let ingested_at: String = row.try_get("ingested_at").map_err(db_err)?;
    let state: String = row.try_get("processing_state").map_err(db_err)?;
    let reason: Option<String> = row.try_get("processing_reason").map_err(db_err)?;
    let processed_at: Option<String> = row.try_get("processed_at").map_err(db_err)?;
    let dedupe_key_hex: String = row.try_get("dedupe_key").map_err(db_err)?;
    let mut dedupe_key = [0u8; 32];
    for (i, byte) in dedupe_key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&dedupe_key_hex[i * 2..i * 2 + 2], 16)
            .map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
    }

    Ok(RawEvent {
        id: RawEventId::from_uuid(parse_uuid(&id_str)?),
        envelope: RawEventEnvelope {
            source_system: row.try_get("source_system").map_err(db_err)?,
            event_type: row.try_get("event_type").map_err(db_err)?,
            source_event_id: row.try_get("source_event_id").map_err(db_err)?,
            repo_external_id: row.try_get("repo_external_id").map_err(db_err)?,
            occurred_at: parse_dt(&occurred_at)?,
            payload,
        },
        dedupe_key,
        ingested_at: parse_dt(&ingested_at)?,
        processing_state: match state.as_str() {
            "unprocessed" => ProcessingState::Unprocessed,
            "processed" => ProcessingState::Processed,
            "failed" => ProcessingState::Failed {
                reason: reason.unwrap_or_default(),
            },
            other => {
                return Err(GhStatusError::DataIntegrity(format!(
                    "unknown processing_state {other}"
                )))
            }
        },
        processed_at: processed_at.map(|s| parse_dt(&s)).transpose()?,
    })
}

#[async_trait]
impl BronzeStore for SqliteStore {
    async fn ingest(&self, envelope: RawEventEnvelope) -> Result<RawEvent, GhStatusError> {
        let key = envelope.dedupe_key();
        let key_hex = gh_status_core::hashing::dedupe_key_hex(&key);

        if let Some(existing) = sqlx::query("SELECT * FROM raw_events WHERE dedupe_key = ?1")
            .bind(&key_hex)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
        {
            return row_to_raw_event(&existing);
        }

        let id = RawEventId::new();
        let payload_json =
            serde_json::to_string(&envelope.payload).map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
        let ingested_at = Utc::now();
        let (state_col, reason_col) = processing_state_to_columns(&ProcessingState::Unprocessed);

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO raw_events
                (id, source_system, event_type, source_event_id, repo_external_id,
                 occurred_at, payload_json, dedupe_key, ingested_at, processing_state,
                 processing_reason, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)
            "#,
        )
        .bind(id.0.to_string())
        .bind(&envelope.source_system)
        .bind(&envelope.event_type)
        .bind(&envelope.source_event_id)
        .bind(&envelope.repo_external_id)
        .bind(envelope.occurred_at.to_rfc3339())
        .bind(&payload_json)
        .bind(&key_hex)
        .bind(ingested_at.to_rfc3339())
        .bind(state_col)
        .bind(reason_col)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let row = sqlx::query("SELECT * FROM raw_events WHERE dedupe_key = ?1")
            .bind(&key_hex)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row_to_raw_event(&row)
    }

    async fn list_unprocessed(&self, limit: i64) -> Result<Vec<RawEvent>, GhStatusError> {
        let rows = sqlx::query(
            "SELECT * FROM raw_events WHERE processing_state = 'unprocessed' \
             ORDER BY occurred_at ASC, id ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_raw_event).collect()
    }

    async fn mark_processed(&self, id: RawEventId) -> Result<(), GhStatusError> {
        sqlx::query(
            "UPDATE raw_events SET processing_state = 'processed', processed_at = ?2 WHERE id = ?1",
        )
        .bind(id.0.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: RawEventId, reason: &str) -> Result<(), GhStatusError> {
        sqlx::query(
            "UPDATE raw_events SET processing_state = 'failed', processing_reason = ?2, processed_at = ?3 WHERE id = ?1",
        )
        .bind(id.0.to_string())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_offset(
        &self,
        repository_external_id: &str,
        stream_kind: StreamKind,
    ) -> Result<Option<IngestionOffset>, GhStatusError> {
        let row = sqlx::query(
            "SELECT * FROM ingestion_offsets WHERE repository_external_id = ?1 AND stream_kind = ?2",
        )
        .bind(repository_external_id)
        .bind(stream_kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| -> Result<IngestionOffset, GhStatusError> {
            let watermark: String = r.try_get("watermark").map_err(db_err)?;
            let updated_at: String = r.try_get("updated_at").map_err(db_err)?;
            Ok(IngestionOffset {
                repository_external_id: repository_external_id.to_string(),
                stream_kind: stream_kind.as_str().to_string(),
                watermark: parse_dt(&watermark)?,
                cursor: r.try_get("cursor").map_err(db_err)?,
                updated_at: parse_dt(&updated_at)?,
            })
        })
        .transpose()
    }

    async fn put_offset(&self, offset: IngestionOffset) -> Result<(), GhStatusError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_offsets (repository_external_id, stream_kind, watermark, cursor, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (repository_external_id, stream_kind)
            DO UPDATE SET watermark = excluded.watermark, cursor = excluded.cursor, updated_at = excluded.updated_at
            "#,
        )
        .bind(&offset.repository_external_id)
        .bind(&offset.stream_kind)
        .bind(offset.watermark.to_rfc3339())
        .bind(&offset.cursor)
        .bind(offset.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_offsets(&self) -> Result<Vec<IngestionOffset>, GhStatusError> {
        let rows = sqlx::query("SELECT * FROM ingestion_offsets")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|r| -> Result<IngestionOffset, GhStatusError> {
                let watermark: String = r.try_get("watermark").map_err(db_err)?;
                let updated_at: String = r.try_get("updated_at").map_err(db_err)?;
                Ok(IngestionOffset {
                    repository_external_id: r.try_get("repository_external_id").map_err(db_err)?,
                    stream_kind: r.try_get("stream_kind").map_err(db_err)?,
                    watermark: parse_dt(&watermark)?,
                    cursor: r.try_get("cursor").map_err(db_err)?,
                    updated_at: parse_dt(&updated_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ProjectionStore for SqliteStore {
    async fn upsert_repository(&self, repository: Repository) -> Result<RepositoryId, GhStatusError> {
        let documentation_paths_json = serde_json::to_string(&repository.documentation_paths)
            .map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let existing = sqlx::query("SELECT id, default_branch FROM repositories WHERE external_id = ?1")
            .bind(&repository.external_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let id = if let Some(row) = existing {
            let id_str: String = row.try_get("id").map_err(db_err)?;
            let id = RepositoryId::from_uuid(parse_uuid(&id_str)?);
            let default_branch = if repository.default_branch != "main" {
                repository.default_branch.clone()
            } else {
                row.try_get("default_branch").map_err(db_err)?
            };
            sqlx::query(
                r#"
                UPDATE repositories SET
                    owner = ?2, name = ?3, default_branch = ?4,
                    documentation_paths_json = CASE WHEN ?5 = '[]' THEN documentation_paths_json ELSE ?5 END,
                    last_seen_at = MAX(last_seen_at, ?6)
                WHERE id = ?1
                "#,
            )
            .bind(id.0.to_string())
            .bind(&repository.owner)
            .bind(&repository.name)
            .bind(&default_branch)
            .bind(&documentation_paths_json)
            .bind(repository.last_seen_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            id
        } else {
            sqlx::query(
                r#"
                INSERT INTO repositories (
                    id, external_id, owner, name, default_branch, documentation_paths_json,
                    ingestion_enabled, first_seen_at, last_seen_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(repository.id.0.to_string())
            .bind(&repository.external_id)
            .bind(&repository.owner)
            .bind(&repository.name)
            .bind(&repository.default_branch)
            .bind(&documentation_paths_json)
            .bind(repository.ingestion_enabled as i64)
            .bind(repository.first_seen_at.to_rfc3339())
            .bind(repository.last_seen_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            repository.id
        };
        tx.commit().await.map_err(db_err)?;
        Ok(id)
    }

    async fn get_repository_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Repository>, GhStatusError> {
        let row = sqlx::query("SELECT * FROM repositories WHERE external_id = ?1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(row_to_repository).transpose()
    }

    async fn get_repository(&self, repository_id: RepositoryId) -> Result<Option<Repository>, GhStatusError> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = ?1")
            .bind(repository_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(row_to_repository).transpose()
    }

    async fn get_repository_by_owner_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Repository>, GhStatusError> {
        let row = sqlx::query("SELECT * FROM repositories WHERE owner = ?1 AND name = ?2")
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(row_to_repository).transpose()
    }

    async fn upsert_commit(&self, commit: Commit) -> Result<(), GhStatusError> {
        let changed_paths_json = serde_json::to_string(&commit.changed_paths)
            .map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO commits (repository_id, sha, message, author, authored_at, changed_paths_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (repository_id, sha) DO UPDATE SET
                message = excluded.message, author = excluded.author,
                authored_at = excluded.authored_at, changed_paths_json = excluded.changed_paths_json
            "#,
        )
        .bind(commit.repository_id.0.to_string())
        .bind(&commit.sha)
        .bind(&commit.message)
        .bind(&commit.author)
        .bind(commit.authored_at.to_rfc3339())
        .bind(&changed_paths_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_pull_request(&self, pull_request: PullRequest) -> Result<(), GhStatusError> {
        let state = match pull_request.state {
            PullRequestState::Open => "open",
            PullRequestState::Closed => "closed",
            PullRequestState::Merged => "merged",
        };
        sqlx::query(
            r#"
            INSERT INTO pull_requests (repository_id, number, title, state, opened_at, closed_at, author)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (repository_id, number) DO UPDATE SET
                title = excluded.title, state = excluded.state,
                closed_at = excluded.closed_at, author = excluded.author
            "#,
        )
        .bind(pull_request.repository_id.0.to_string())
        .bind(pull_request.number)
        .bind(&pull_request.title)
        .bind(state)
        .bind(pull_request.opened_at.to_rfc3339())
        .bind(pull_request.closed_at.map(|d| d.to_rfc3339()))
        .bind(&pull_request.author)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_issue(&self, issue: Issue) -> Result<(), GhStatusError> {
        let state = match issue.state {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        };
        let labels_json =
            serde_json::to_string(&issue.labels).map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO issues (repository_id, number, title, state, labels_json, opened_at, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (repository_id, number) DO UPDATE SET
                title = excluded.title, state = excluded.state,
                labels_json = excluded.labels_json, closed_at = excluded.closed_at
            "#,
        )
        .bind(issue.repository_id.0.to_string())
        .bind(issue.number)
        .bind(&issue.title)
        .bind(state)
        .bind(&labels_json)
        .bind(issue.opened_at.to_rfc3339())
        .bind(issue.closed_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_documentation_change(
        &self,
        change: DocumentationChange,
    ) -> Result<(), GhStatusError> {
        sqlx::query(
            r#"
            INSERT INTO documentation_changes (repository_id, commit_sha, path, occurred_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (repository_id, commit_sha, path) DO UPDATE SET
                occurred_at = excluded.occurred_at
            "#,
        )
        .bind(change.repository_id.0.to_string())
        .bind(&change.commit_sha)
        .bind(&change.path)
        .bind(change.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_event_fact(&self, fact: EventFact) -> Result<EventFactId, GhStatusError> {
        let natural_key = format!(
            "{}|{}|{}",
            fact.repository_id.0,
            fact.kind,
            fact.occurred_at.to_rfc3339()
        );
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT OR IGNORE INTO event_facts (id, repository_id, kind, occurred_at, summary, natural_key) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(fact.id.0.to_string())
        .bind(fact.repository_id.0.to_string())
        .bind(&fact.kind)
        .bind(fact.occurred_at.to_rfc3339())
        .bind(&fact.summary)
        .bind(&natural_key)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let row = sqlx::query("SELECT id FROM event_facts WHERE natural_key = ?1")
            .bind(&natural_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        let id_str: String = row.try_get("id").map_err(db_err)?;
        Ok(EventFactId::from_uuid(parse_uuid(&id_str)?))
    }

    async fn list_event_facts(
        &self,
        repository_id: RepositoryId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<EventFact>, GhStatusError> {
        let rows = sqlx::query(
            "SELECT * FROM event_facts WHERE repository_id = ?1 AND occurred_at >= ?2 AND occurred_at < ?3 \
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(repository_id.0.to_string())
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|r| -> Result<EventFact, GhStatusError> {
                let id_str: String = r.try_get("id").map_err(db_err)?;
                let occurred_at: String = r.try_get("occurred_at").map_err(db_err)?;
                Ok(EventFact {
                    id: EventFactId::from_uuid(parse_uuid(&id_str)?),
                    repository_id,
                    kind: r.try_get("kind").map_err(db_err)?,
                    occurred_at: parse_dt(&occurred_at)?,
                    summary: r.try_get("summary").map_err(db_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl GoldStore for SqliteStore {
    async fn insert_report(
        &self,
        report: Report,
        coverage: ReportCoverage,
    ) -> Result<(), GhStatusError> {
        let fact_ids_json = serde_json::to_string(
            &coverage.fact_ids.iter().map(|f| f.0.to_string()).collect::<Vec<_>>(),
        )
        .map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
        let scope = match coverage.scope {
            ReportScope::Repository => "repository",
            ReportScope::Project => "project",
            ReportScope::Estate => "estate",
        };

        let status = report_status_to_str(report.status);

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            INSERT INTO reports (
                id, repository_id, window_start, window_end, body, status, model,
                generated_at, validation_attempts, model_latency_ms, prompt_tokens,
                completion_tokens, total_tokens
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(report.id.0.to_string())
        .bind(report.repository_id.0.to_string())
        .bind(report.window_start.to_rfc3339())
        .bind(report.window_end.to_rfc3339())
        .bind(&report.body)
        .bind(status)
        .bind(&report.model)
        .bind(report.generated_at.to_rfc3339())
        .bind(report.validation_attempts as i64)
        .bind(report.model_latency_ms.map(|v| v as i64))
        .bind(report.prompt_tokens.map(|v| v as i64))
        .bind(report.completion_tokens.map(|v| v as i64))
        .bind(report.total_tokens.map(|v| v as i64))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO report_coverage (report_id, scope, repository_id, fact_ids_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(coverage.report_id.0.to_string())
        .bind(scope)
        .bind(coverage.repository_id.0.to_string())
        .bind(&fact_ids_json)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn latest_report(&self, repository_id: RepositoryId) -> Result<Option<Report>, GhStatusError> {
        let row = sqlx::query(
            "SELECT * FROM reports WHERE repository_id = ?1 ORDER BY window_end DESC LIMIT 1",
        )
        .bind(repository_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| row_to_report(&r)).transpose()
    }

    async fn recent_reports(
        &self,
        repository_id: RepositoryId,
        limit: i64,
    ) -> Result<Vec<Report>, GhStatusError> {
        let rows = sqlx::query(
            "SELECT * FROM reports WHERE repository_id = ?1 ORDER BY window_end DESC LIMIT ?2",
        )
        .bind(repository_id.0.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_report).collect()
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, GhStatusError> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?1")
            .bind(report_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_report(&r)).transpose()
    }

    async fn get_coverage(&self, report_id: ReportId) -> Result<Option<ReportCoverage>, GhStatusError> {
        let row = sqlx::query("SELECT * FROM report_coverage WHERE report_id = ?1")
            .bind(report_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| -> Result<ReportCoverage, GhStatusError> {
            let scope: String = r.try_get("scope").map_err(db_err)?;
            let repository_id_str: String = r.try_get("repository_id").map_err(db_err)?;
            let fact_ids_json: String = r.try_get("fact_ids_json").map_err(db_err)?;
            let fact_id_strs: Vec<String> =
                serde_json::from_str(&fact_ids_json).map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
            let fact_ids = fact_id_strs
                .iter()
                .map(|s| parse_uuid(s).map(EventFactId::from_uuid))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ReportCoverage {
                report_id,
                scope: match scope.as_str() {
                    "repository" => ReportScope::Repository,
                    "project" => ReportScope::Project,
                    "estate" => ReportScope::Estate,
                    other => {
                        return Err(GhStatusError::DataIntegrity(format!("unknown scope {other}")))
                    }
                },
                repository_id: RepositoryId::from_uuid(parse_uuid(&repository_id_str)?),
                fact_ids,
            })
        })
        .transpose()
    }

    async fn insert_review(&self, review: ReportReview) -> Result<(), GhStatusError> {
        let issues_json =
            serde_json::to_string(&review.issues).map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
        let state = review_state_to_str(review.state);
        sqlx::query(
            r#"
            INSERT INTO report_reviews
                (id, repository_id, window_start, window_end, last_draft, issues_json, attempts, state, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (repository_id, window_start, window_end) DO UPDATE SET
                last_draft = excluded.last_draft, issues_json = excluded.issues_json,
                attempts = excluded.attempts, state = excluded.state, created_at = excluded.created_at
            "#,
        )
        .bind(review.id.0.to_string())
        .bind(review.repository_id.0.to_string())
        .bind(review.window_start.to_rfc3339())
        .bind(review.window_end.to_rfc3339())
        .bind(&review.last_draft)
        .bind(&issues_json)
        .bind(review.attempts as i64)
        .bind(state)
        .bind(review.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn review_state_to_str(state: ReviewState) -> &'static str {
    match state {
        ReviewState::Pending => "pending",
        ReviewState::Resolved => "resolved",
    }
}

fn review_state_from_str(state: &str) -> ReviewState {
    match state {
        "resolved" => ReviewState::Resolved,
        _ => ReviewState::Pending,
    }
}

fn report_status_to_str(status: ReportStatus) -> &'static str {
    match status {
        ReportStatus::OnTrack => "on_track",
        ReportStatus::AtRisk => "at_risk",
        ReportStatus::Blocked => "blocked",
        ReportStatus::Unknown => "unknown",
    }
}

fn report_status_from_str(status: &str) -> ReportStatus {
    match status {
        "on_track" => ReportStatus::OnTrack,
        "at_risk" => ReportStatus::AtRisk,
        "blocked" => ReportStatus::Blocked,
        _ => ReportStatus::Unknown,
    }
}

fn row_to_report(row: &sqlx::sqlite::SqliteRow) -> Result<Report, GhStatusError> {
    let id_str: String = row.try_get("id").map_err(db_err)?;
    let repository_id_str: String = row.try_get("repository_id").map_err(db_err)?;
    let window_start: String = row.try_get("window_start").map_err(db_err)?;
    let window_end: String = row.try_get("window_end").map_err(db_err)?;
    let generated_at: String = row.try_get("generated_at").map_err(db_err)?;
    let validation_attempts: i64 = row.try_get("validation_attempts").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let model_latency_ms: Option<i64> = row.try_get("model_latency_ms").map_err(db_err)?;
    let prompt_tokens: Option<i64> = row.try_get("prompt_tokens").map_err(db_err)?;
    let completion_tokens: Option<i64> = row.try_get("completion_tokens").map_err(db_err)?;
    let total_tokens: Option<i64> = row.try_get("total_tokens").map_err(db_err)?;
    Ok(Report {
        id: ReportId::from_uuid(parse_uuid(&id_str)?),
        repository_id: RepositoryId::from_uuid(parse_uuid(&repository_id_str)?),
        window_start: parse_dt(&window_start)?,
        window_end: parse_dt(&window_end)?,
        body: row.try_get("body").map_err(db_err)?,
        status: report_status_from_str(&status),
        model: row.try_get("model").map_err(db_err)?,
        generated_at: parse_dt(&generated_at)?,
        validation_attempts: validation_attempts as u32,
        model_latency_ms: model_latency_ms.map(|v| v as u64),
        prompt_tokens: prompt_tokens.map(|v| v as u32),
        completion_tokens: completion_tokens.map(|v| v as u32),
        total_tokens: total_tokens.map(|v| v as u32),
    })
}

#[allow(dead_code)]
fn row_to_review(row: &sqlx::sqlite::SqliteRow) -> Result<ReportReview, GhStatusError> {
    let id_str: String = row.try_get("id").map_err(db_err)?;
    let repository_id_str: String = row.try_get("repository_id").map_err(db_err)?;
    let window_start: String = row.try_get("window_start").map_err(db_err)?;
    let window_end: String = row.try_get("window_end").map_err(db_err)?;
    let created_at: String = row.try_get("created_at").map_err(db_err)?;
    let issues_json: String = row.try_get("issues_json").map_err(db_err)?;
    let issues: Vec<ValidationIssue> =
        serde_json::from_str(&issues_json).map_err(|e| GhStatusError::DataIntegrity(e.to_string()))?;
    let attempts: i64 = row.try_get("attempts").map_err(db_err)?;
    let state: String = row.try_get("state").map_err(db_err)?;
    Ok(ReportReview {
        id: ReportReviewId::from_uuid(parse_uuid(&id_str)?),
        repository_id: RepositoryId::from_uuid(parse_uuid(&repository_id_str)?),
        window_start: parse_dt(&window_start)?,
        window_end: parse_dt(&window_end)?,
        last_draft: row.try_get("last_draft").map_err(db_err)?,
        issues,
        attempts: attempts as u32,
        state: review_state_from_str(&state),
        created_at: parse_dt(&created_at)?,
    })
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn upsert(&self, record: RepositoryRecord) -> Result<(), GhStatusError> {
        sqlx::query(
            r#"
            INSERT INTO registry (external_id, id, owner, name, ingestion_enabled, catalogue_repository_id, registered_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (external_id) DO UPDATE SET
                owner = excluded.owner, name = excluded.name,
                ingestion_enabled = excluded.ingestion_enabled,
                catalogue_repository_id = excluded.catalogue_repository_id
            "#,
        )
        .bind(&record.external_id)
        .bind(record.id.map(|id| id.0.to_string()))
        .bind(&record.owner)
        .bind(&record.name)
        .bind(record.ingestion_enabled as i64)
        .bind(&record.catalogue_repository_id)
        .bind(record.registered_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_ingestion_enabled(
        &self,
        external_id: &str,
        enabled: bool,
    ) -> Result<(), GhStatusError> {
        let result = sqlx::query("UPDATE registry SET ingestion_enabled = ?2 WHERE external_id = ?1")
            .bind(external_id)
            .bind(enabled as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(GhStatusError::UnknownRepository(external_id.to_string()));
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<RepositoryRecord>, GhStatusError> {
        let rows = sqlx::query("SELECT * FROM registry WHERE ingestion_enabled = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_registry_record).collect()
    }

    async fn get(&self, external_id: &str) -> Result<Option<RepositoryRecord>, GhStatusError> {
        let row = sqlx::query("SELECT * FROM registry WHERE external_id = ?1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_registry_record(&r)).transpose()
    }

    async fn list_all(&self) -> Result<Vec<RepositoryRecord>, GhStatusError> {
        let rows = sqlx::query("SELECT * FROM registry")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_registry_record).collect()
    }
}

fn row_to_registry_record(row: &sqlx::sqlite::SqliteRow) -> Result<RepositoryRecord, GhStatusError> {
    let id_str: Option<String> = row.try_get("id").map_err(db_err)?;
    let registered_at: String = row.try_get("registered_at").map_err(db_err)?;
    let ingestion_enabled: i64 = row.try_get("ingestion_enabled").map_err(db_err)?;
    Ok(RepositoryRecord {
        id: id_str.map(|s| parse_uuid(&s)).transpose()?.map(RepositoryId::from_uuid),
        external_id: row.try_get("external_id").map_err(db_err)?,
        owner: row.try_get("owner").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        ingestion_enabled: ingestion_enabled != 0,
        catalogue_repository_id: row.try_get("catalogue_repository_id").map_err(db_err)?,
        registered_at: parse_dt(&registered_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(source_event_id: &str) -> RawEventEnvelope {
        RawEventEnvelope {
            source_system: "github".to_string(),
            event_type: "commit".to_string(),
            source_event_id: Some(source_event_id.to_string()),
            repo_external_id: Some("repo-1".to_string()),
            occurred_at: Utc::now(),
            payload: PayloadValue::from_json(&json!({"sha": "abc"})).unwrap(),
        }
    }

    #[tokio::test]
    async fn ingest_is_idempotent_on_dedupe_key() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store.ingest(envelope("e1")).await.unwrap();
        let second = store.ingest(envelope("e1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_unprocessed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persists_across_reopen_of_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.ingest(envelope("e1")).await.unwrap();
            store.close().await;
        }
        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_unprocessed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repository_upsert_keeps_latest_last_seen_at() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = RepositoryId::new();
        let first_seen = Utc::now();
        let repo = Repository {
            id,
            external_id: "gh:1".to_string(),
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            default_branch: "main".to_string(),
            documentation_paths: Vec::new(),
            ingestion_enabled: false,
            first_seen_at: first_seen,
            last_seen_at: first_seen,
        };
        let resolved_id = store.upsert_repository(repo.clone()).await.unwrap();
        assert_eq!(resolved_id, id);

        let later = first_seen + chrono::Duration::hours(1);
        let mut updated = repo;
        updated.last_seen_at = later;
        store.upsert_repository(updated).await.unwrap();

        let fetched = store.get_repository_by_external_id("gh:1").await.unwrap().unwrap();
        assert_eq!(fetched.last_seen_at, later);
    }

    #[tokio::test]
    async fn documentation_change_dedupes_per_path() {
        let store = SqliteStore::in_memory().await.unwrap();
        let repository_id = RepositoryId::new();
        let occurred_at = Utc::now();
        store
            .upsert_documentation_change(DocumentationChange {
                repository_id,
                commit_sha: "c1".to_string(),
                path: "docs/intro.md".to_string(),
                occurred_at,
            })
            .await
            .unwrap();
        store
            .upsert_documentation_change(DocumentationChange {
                repository_id,
                commit_sha: "c1".to_string(),
                path: "docs/setup.md".to_string(),
                occurred_at,
            })
            .await
            .unwrap();

        let rows = sqlx::query("SELECT COUNT(*) AS n FROM documentation_changes WHERE repository_id = ?1")
            .bind(repository_id.0.to_string())
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let count: i64 = rows.try_get("n").unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn re_running_a_failing_window_updates_the_existing_review_instead_of_duplicating() {
        let store = SqliteStore::in_memory().await.unwrap();
        let repository_id = RepositoryId::new();
        let window_start = Utc::now();
        let window_end = window_start + chrono::Duration::days(1);

        let first = ReportReview {
            id: ReportReviewId::new(),
            repository_id,
            window_start,
            window_end,
            last_draft: "first draft".to_string(),
            issues: vec![],
            attempts: 1,
            state: ReviewState::Pending,
            created_at: Utc::now(),
        };
        store.insert_review(first).await.unwrap();

        let second = ReportReview {
            id: ReportReviewId::new(),
            repository_id,
            window_start,
            window_end,
            last_draft: "second draft".to_string(),
            issues: vec![],
            attempts: 3,
            state: ReviewState::Pending,
            created_at: Utc::now(),
        };
        store.insert_review(second).await.unwrap();

        let rows = sqlx::query("SELECT COUNT(*) AS n FROM report_reviews WHERE repository_id = ?1")
            .bind(repository_id.0.to_string())
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let count: i64 = rows.try_get("n").unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn event_fact_insert_is_idempotent_on_natural_key() {
        let store = SqliteStore::in_memory().await.unwrap();
        let repository_id = RepositoryId::new();
        let occurred_at = Utc::now();
        let fact = EventFact {
            id: EventFactId::new(),
            repository_id,
            kind: "commit".to_string(),
            occurred_at,
            summary: "pushed a commit".to_string(),
        };
        let first_id = store.insert_event_fact(fact.clone()).await.unwrap();
        let mut duplicate = fact;
        duplicate.id = EventFactId::new();
        let second_id = store.insert_event_fact(duplicate).await.unwrap();
        assert_eq!(first_id, second_id);
    }
}

//! **gh-status-cli** – command-line front-end for the reporting pipeline.
//!
//! Each subcommand wires a handful of library crates together over a single
//! `SqliteStore` and exits with the codes described in the configuration
//! surface: `0` success, `1` generic failure, `2` configuration error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gh_status_api::{router, ApiState};
use gh_status_config::{AppConfig, StatusModelBackend};
use gh_status_core::error::GhStatusError;
use gh_status_core::traits::ProjectionStore;
use gh_status_ingest::IngestionWorker;
use gh_status_model::{ChatCompletionProvider, HeuristicProvider, StatusModel, StatusModelProvider};
use gh_status_orchestrator::{Orchestrator, OrchestratorConfig, ReportOutcome};
use gh_status_projector::Projector;
use gh_status_registry::Registry;
use gh_status_render::ReportSink;
use gh_status_source::{GitHubRemoteSource, InMemoryRemoteSource, RemoteSource};
use gh_status_store_sqlite::SqliteStore;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "gh-status",
    version = env!("CARGO_PKG_VERSION"),
    about = "Estate-level engineering status reporting over GitHub activity",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass for a single repository.
    Ingest {
        /// Repository owner.
        #[arg(long)]
        owner: String,
        /// Repository name.
        #[arg(long)]
        name: String,
    },
    /// Run one projector batch over unprocessed Bronze events.
    Project {
        /// Maximum number of events to project in this batch.
        #[arg(long, default_value_t = 500)]
        batch_size: i64,
    },
    /// Run the reporting orchestrator once for a single repository.
    Report {
        /// Repository owner.
        #[arg(long)]
        owner: String,
        /// Repository name.
        #[arg(long)]
        name: String,
    },
    /// Start the on-demand HTTP reporting surface.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err @ GhStatusError::MissingConfig(_)) => {
            error!(%err, "configuration error");
            return ExitCode::from(2);
        }
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    let path = config
        .database_url
        .strip_prefix("sqlite://")
        .unwrap_or(&config.database_url);
    SqliteStore::open(path)
        .await
        .with_context(|| format!("failed to open database at {path}"))
}

fn build_status_model(config: &AppConfig) -> Result<StatusModel> {
    let provider: Arc<dyn StatusModelProvider> = match config.status_model_backend {
        StatusModelBackend::Mock => Arc::new(HeuristicProvider),
        StatusModelBackend::ChatCompletion => {
            let options = config
                .status_model_options
                .as_ref()
                .context("chat_completion backend selected without options")?;
            let mut provider = ChatCompletionProvider::new(
                options.endpoint.clone(),
                options.api_key.clone(),
                options.model.clone(),
            );
            if let Some(max_tokens) = options.max_tokens {
                provider = provider.with_max_tokens(max_tokens);
            }
            Arc::new(provider)
        }
    };
    Ok(StatusModel::new(provider, 60))
}

fn build_remote_source(config: &AppConfig) -> Arc<dyn RemoteSource> {
    match &config.remote_source_token {
        Some(token) => match GitHubRemoteSource::new("https://api.github.com", token.clone()) {
            Ok(source) => Arc::new(source),
            Err(err) => {
                info!(%err, "falling back to the in-memory remote source");
                Arc::new(InMemoryRemoteSource::new(Vec::new()))
            }
        },
        None => {
            info!("no REMOTE_SOURCE_TOKEN configured; using the in-memory remote source");
            Arc::new(InMemoryRemoteSource::new(Vec::new()))
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let store = Arc::new(open_store(&config).await?);

    match cli.command {
        Commands::Ingest { owner, name } => run_ingest(store, &config, &owner, &name).await,
        Commands::Project { batch_size } => run_project(store, batch_size).await,
        Commands::Report { owner, name } => run_report(store, &config, &owner, &name).await,
        Commands::Serve { port } => run_serve(store, &config, port).await,
    }
}

async fn run_ingest(store: Arc<SqliteStore>, config: &AppConfig, owner: &str, name: &str) -> Result<()> {
    let registry = Registry::new(store.clone());
    let active = registry.list_active().await?;
    let record = active
        .into_iter()
        .find(|r| r.owner == owner && r.name == name)
        .with_context(|| format!("{owner}/{name} is not a registered, ingestion-enabled repository"))?;

    let source = build_remote_source(config);
    let worker = IngestionWorker::new(store, source, config.ingestion_max_events_per_run as usize);
    let outcome = worker.run_for_repository(&record).await;
    info!(?outcome, "ingestion run complete");
    Ok(())
}

async fn run_project(store: Arc<SqliteStore>, batch_size: i64) -> Result<()> {
    let projector = Projector::new(store.clone(), store);
    let summary = projector.run_once(batch_size).await?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "processed": summary.processed,
        "failed": summary.failed,
    }))?);
    Ok(())
}

async fn run_report(store: Arc<SqliteStore>, config: &AppConfig, owner: &str, name: &str) -> Result<()> {
    let repository = store
        .get_repository_by_owner_name(owner, name)
        .await?
        .with_context(|| format!("{owner}/{name} has no Silver-layer entity yet"))?;

    let model = Arc::new(build_status_model(config)?);
    let sink = config
        .report_sink_base_path
        .as_ref()
        .map(|path| Arc::new(ReportSink::new(path.clone())));
    let orchestrator_config = OrchestratorConfig {
        default_window_days: config.reporting_window_days as i64,
        validation_max_attempts: config.validation_max_attempts,
    };
    let orchestrator = Orchestrator::new(store.clone(), store, model, sink, orchestrator_config);

    match orchestrator.run_for_repository(repository.id).await? {
        ReportOutcome::Generated(report) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "report_id": report.id.to_string(),
                    "repository": format!("{owner}/{name}"),
                    "window_start": report.window_start,
                    "window_end": report.window_end,
                    "generated_at": report.generated_at,
                    "status": report.status,
                    "model": report.model,
                }))?
            );
            Ok(())
        }
        ReportOutcome::NoEvidence => {
            println!("no uncovered evidence for {owner}/{name}");
            Ok(())
        }
        ReportOutcome::ValidationFailed(review) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "review_id": review.id.to_string(),
                    "issues": review.issues,
                }))?
            );
            Err(anyhow::anyhow!("report failed validation, recorded as review {}", review.id))
        }
    }
}

async fn run_serve(store: Arc<SqliteStore>, config: &AppConfig, port: u16) -> Result<()> {
    let model = Arc::new(build_status_model(config)?);
    let sink = config
        .report_sink_base_path
        .as_ref()
        .map(|path| Arc::new(ReportSink::new(path.clone())));
    let orchestrator_config = OrchestratorConfig {
        default_window_days: config.reporting_window_days as i64,
        validation_max_attempts: config.validation_max_attempts,
    };
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        model,
        sink,
        orchestrator_config,
    ));

    let app = router(ApiState {
        silver: store,
        orchestrator,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind to port {port}"))?;

    info!(port, "HTTP server listening");
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            result.context("HTTP server error")?;
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

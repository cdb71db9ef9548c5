#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-config** – typed application configuration, loaded from the
//! environment (with `.env` support) and validated at startup.

use gh_status_core::error::GhStatusError;
use secrecy::Secret;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Which status model backend to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusModelBackend {
    /// The deterministic, no-network heuristic backend.
    Mock,
    /// The remote chat-completion backend.
    ChatCompletion,
}

impl FromStr for StatusModelBackend {
    type Err = GhStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(StatusModelBackend::Mock),
            "chat_completion" => Ok(StatusModelBackend::ChatCompletion),
            other => Err(GhStatusError::MissingConfig(format!(
                "unknown status_model.backend {other:?}, expected \"mock\" or \"chat_completion\""
            ))),
        }
    }
}

/// Options only meaningful when [`StatusModelBackend::ChatCompletion`] is selected.
#[derive(Debug, Clone)]
pub struct ChatCompletionOptions {
    /// API key for the remote backend.
    pub api_key: Secret<String>,
    /// Base URL of the chat-completion API.
    pub endpoint: String,
    /// Model identifier to request.
    pub model: String,
    /// Sampling temperature, when the backend supports it.
    pub temperature: Option<f32>,
    /// Response token budget.
    pub max_tokens: Option<u32>,
}

/// Typed, validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Default reporting window, in days, for a repository with no prior report.
    pub reporting_window_days: u32,
    /// Maximum draft-and-validate attempts before recording a review.
    pub validation_max_attempts: u32,
    /// Which status model backend to invoke.
    pub status_model_backend: StatusModelBackend,
    /// Chat-completion backend options, required iff the backend is selected.
    pub status_model_options: Option<ChatCompletionOptions>,
    /// Lag, in seconds, past which a repository is considered stalled.
    pub ingestion_stalled_threshold_seconds: u64,
    /// Upper bound on events ingested per repository per run.
    pub ingestion_max_events_per_run: u32,
    /// Root directory rendered reports are written under. `None` disables the sink.
    pub report_sink_base_path: Option<PathBuf>,
    /// Connection string for the SQLite-backed medallion store.
    pub database_url: String,
    /// Bearer token for the remote GitHub source, when required.
    pub remote_source_token: Option<Secret<String>>,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_numeric<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// Load and validate configuration from the environment, reading a
    /// `.env` file first if one is present in the working directory.
    pub fn from_env() -> Result<Self, GhStatusError> {
        if dotenvy::dotenv().is_ok() {
            debug!(".env file loaded");
        }

        let status_model_backend = env_var("STATUS_MODEL_BACKEND")
            .unwrap_or_else(|| "mock".to_string())
            .parse::<StatusModelBackend>()?;

        let status_model_options = match status_model_backend {
            StatusModelBackend::Mock => None,
            StatusModelBackend::ChatCompletion => {
                let api_key = env_var("STATUS_MODEL_API_KEY").ok_or_else(|| {
                    GhStatusError::MissingConfig(
                        "STATUS_MODEL_API_KEY is required when status_model.backend=chat_completion"
                            .to_string(),
                    )
                })?;
                let endpoint = env_var("STATUS_MODEL_ENDPOINT").ok_or_else(|| {
                    GhStatusError::MissingConfig(
                        "STATUS_MODEL_ENDPOINT is required when status_model.backend=chat_completion"
                            .to_string(),
                    )
                })?;
                let model = env_var("STATUS_MODEL_MODEL").ok_or_else(|| {
                    GhStatusError::MissingConfig(
                        "STATUS_MODEL_MODEL is required when status_model.backend=chat_completion"
                            .to_string(),
                    )
                })?;
                Some(ChatCompletionOptions {
                    api_key: Secret::new(api_key),
                    endpoint,
                    model,
                    temperature: env_var("STATUS_MODEL_TEMPERATURE").and_then(|v| v.parse().ok()),
                    max_tokens: env_var("STATUS_MODEL_MAX_TOKENS").and_then(|v| v.parse().ok()),
                })
            }
        };

        let database_url = env_var("DATABASE_URL").ok_or_else(|| {
            GhStatusError::MissingConfig("DATABASE_URL is required".to_string())
        })?;

        Ok(Self {
            reporting_window_days: env_numeric("REPORTING_WINDOW_DAYS", 7),
            validation_max_attempts: env_numeric("VALIDATION_MAX_ATTEMPTS", 2),
            status_model_backend,
            status_model_options,
            ingestion_stalled_threshold_seconds: env_numeric(
                "INGESTION_STALLED_THRESHOLD_SECONDS",
                3600,
            ),
            ingestion_max_events_per_run: env_numeric("INGESTION_MAX_EVENTS_PER_RUN", 500),
            report_sink_base_path: env_var("REPORT_SINK_BASE_PATH").map(PathBuf::from),
            database_url,
            remote_source_token: env_var("REMOTE_SOURCE_TOKEN").map(Secret::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialise tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "STATUS_MODEL_BACKEND",
            "STATUS_MODEL_API_KEY",
            "STATUS_MODEL_ENDPOINT",
            "STATUS_MODEL_MODEL",
            "DATABASE_URL",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_to_the_mock_backend_and_requires_only_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "sqlite://test.db");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.status_model_backend, StatusModelBackend::Mock);
        assert!(config.status_model_options.is_none());
        clear_env();
    }

    #[test]
    fn chat_completion_backend_without_api_key_fails_with_missing_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "sqlite://test.db");
        std::env::set_var("STATUS_MODEL_BACKEND", "chat_completion");

        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, GhStatusError::MissingConfig(_)));
        clear_env();
    }
}

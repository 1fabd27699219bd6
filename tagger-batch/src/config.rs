//! Configuration resolution for tagger-batch
//!
//! Multi-tier resolution with CLI → ENV → TOML → default priority.

use std::path::PathBuf;
use std::time::Duration;
use tagger_common::config::{resolve_run_folder, TomlConfig};
use tagger_common::{Error, Result};
use tracing::{info, warn};

pub const RUN_DIR_ENV_VAR: &str = "TAGGER_RUN_DIR";
pub const API_KEY_ENV_VAR: &str = "TAGGER_API_KEY";
pub const FALLBACK_API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV_VAR: &str = "TAGGER_API_BASE_URL";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_COMPLETION_WINDOW: &str = "24h";
const DEFAULT_ENDPOINT: &str = "/v1/chat/completions";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_MAX_POLL_RETRIES: u32 = 5;
const DEFAULT_BACKOFF_INITIAL_MS: u64 = 2_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

/// Remote batch API settings
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Endpoint each batch line targets
    pub endpoint: String,
    pub completion_window: String,
}

/// Job monitor polling settings
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Consecutive transient failures tolerated per poll
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Stop (without error) after this many polls
    pub max_polls: Option<u32>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_retries: DEFAULT_MAX_POLL_RETRIES,
            backoff_initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            max_polls: None,
        }
    }
}

/// Values given on the command line (highest priority)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub run_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub max_polls: Option<u32>,
}

/// Fully resolved pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub run_dir: PathBuf,
    pub api: ApiSettings,
    pub monitor: MonitorSettings,
    /// Replaces the built-in subgenre taxonomy when set
    pub taxonomy_file: Option<PathBuf>,
}

impl PipelineConfig {
    /// Resolve configuration from CLI overrides, environment and TOML
    pub fn resolve(cli: &CliOverrides, toml_config: &TomlConfig) -> Result<Self> {
        let run_dir = resolve_run_folder(cli.run_dir.as_deref(), RUN_DIR_ENV_VAR, toml_config);

        let base_url = env_value(BASE_URL_ENV_VAR)
            .or_else(|| toml_config.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let api = ApiSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: resolve_api_key(toml_config),
            model: cli
                .model
                .clone()
                .or_else(|| toml_config.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            completion_window: toml_config
                .completion_window
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPLETION_WINDOW.to_string()),
        };

        let poll_interval_secs = cli
            .poll_interval_secs
            .or(toml_config.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be greater than zero".to_string()));
        }

        let backoff_initial_ms = toml_config.backoff_initial_ms.unwrap_or(DEFAULT_BACKOFF_INITIAL_MS);
        let backoff_max_ms = toml_config.backoff_max_ms.unwrap_or(DEFAULT_BACKOFF_MAX_MS);
        if backoff_max_ms < backoff_initial_ms {
            return Err(Error::Config(format!(
                "backoff_max_ms ({}) is smaller than backoff_initial_ms ({})",
                backoff_max_ms, backoff_initial_ms
            )));
        }

        let monitor = MonitorSettings {
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_retries: toml_config.max_poll_retries.unwrap_or(DEFAULT_MAX_POLL_RETRIES),
            backoff_initial: Duration::from_millis(backoff_initial_ms),
            backoff_max: Duration::from_millis(backoff_max_ms),
            max_polls: cli.max_polls,
        };

        Ok(Self {
            run_dir,
            api,
            monitor,
            taxonomy_file: toml_config.taxonomy_file.clone(),
        })
    }

    /// API key, or a configuration error explaining where to set it
    pub fn require_api_key(&self) -> Result<&str> {
        self.api.api_key.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "Batch API key not configured. Please configure using one of:\n\
                 1. Environment: {}=your-key-here (or {})\n\
                 2. TOML config: ~/.config/tagger/config.toml (api_key = \"your-key\")",
                API_KEY_ENV_VAR, FALLBACK_API_KEY_ENV_VAR
            ))
        })
    }
}

/// Resolve the API key: `TAGGER_API_KEY` → `OPENAI_API_KEY` → TOML
fn resolve_api_key(toml_config: &TomlConfig) -> Option<String> {
    let candidates = [
        (env_value(API_KEY_ENV_VAR), "environment"),
        (env_value(FALLBACK_API_KEY_ENV_VAR), "environment (fallback)"),
        (toml_config.api_key.clone().filter(|k| is_valid_key(k)), "TOML"),
    ];

    let sources: Vec<&str> = candidates
        .iter()
        .filter(|(key, _)| key.is_some())
        .map(|(_, source)| *source)
        .collect();
    if sources.len() > 1 {
        warn!(
            "API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    let (key, source) = candidates.into_iter().find(|(key, _)| key.is_some())?;
    info!("Batch API key loaded from {}", source);
    key
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| is_valid_key(v))
}

/// Validate a configured string (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

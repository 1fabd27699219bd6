//! Configuration loading and run folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_ENV_VAR: &str = "TAGGER_CONFIG";

/// Run folder used when nothing else is configured
pub const DEFAULT_RUN_FOLDER: &str = "tagger-run";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// On-disk TOML configuration
///
/// Every key is optional; callers layer CLI and environment values on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub run_dir: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub completion_window: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub max_poll_retries: Option<u32>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub taxonomy_file: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Locate the TOML config file.
///
/// Priority order:
/// 1. Command-line argument (must exist)
/// 2. `TAGGER_CONFIG` environment variable (must exist)
/// 3. `<config dir>/tagger/config.toml` if present
///
/// Returns `Ok(None)` when no file is configured and the default is absent.
pub fn locate_config_file(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf()).map(Some);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return require_exists(PathBuf::from(path)).map(Some);
    }

    Ok(dirs::config_dir()
        .map(|d| d.join("tagger").join("config.toml"))
        .filter(|p| p.exists()))
}

fn require_exists(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

/// Load a TOML config file, or defaults when `path` is `None`
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        return Ok(TomlConfig::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::debug!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Resolve the run folder.
///
/// Priority order: command-line argument, environment variable, TOML
/// `run_dir`, then `./tagger-run`.
pub fn resolve_run_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.run_dir {
        return path.clone();
    }

    PathBuf::from(DEFAULT_RUN_FOLDER)
}

//! Configuration resolution tests
//!
//! CLI → ENV → TOML → default priority, against a TOML file on disk.

use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;
use tagger_batch::config::{
    CliOverrides, PipelineConfig, API_KEY_ENV_VAR, BASE_URL_ENV_VAR, FALLBACK_API_KEY_ENV_VAR,
    RUN_DIR_ENV_VAR,
};
use tagger_common::config::{load_toml_config, locate_config_file, TomlConfig, CONFIG_ENV_VAR};
use tempfile::TempDir;

fn clear_env() {
    for name in [
        API_KEY_ENV_VAR,
        FALLBACK_API_KEY_ENV_VAR,
        BASE_URL_ENV_VAR,
        RUN_DIR_ENV_VAR,
        CONFIG_ENV_VAR,
    ] {
        std::env::remove_var(name);
    }
}

const CONFIG_TOML: &str = r#"
run_dir = "/data/runs/catalog"
api_base_url = "https://batch.example.com/v1/"
api_key = "toml-key"
model = "gpt-4o"
poll_interval_secs = 60
max_poll_retries = 8

[logging]
level = "warn"
"#;

fn toml_fixture() -> TomlConfig {
    TomlConfig {
        run_dir: Some(PathBuf::from("/data/runs/catalog")),
        api_base_url: Some("https://batch.example.com/v1/".to_string()),
        api_key: Some("toml-key".to_string()),
        model: Some("gpt-4o".to_string()),
        poll_interval_secs: Some(60),
        max_poll_retries: Some(8),
        ..Default::default()
    }
}

#[test]
#[serial]
fn test_toml_file_values_apply_below_cli() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, CONFIG_TOML).unwrap();

    let located = locate_config_file(Some(&path)).unwrap();
    let toml_config = load_toml_config(located.as_deref()).unwrap();
    assert_eq!(toml_config.logging.level, "warn");

    let cli = CliOverrides {
        model: Some("gpt-4.1-mini".to_string()),
        poll_interval_secs: Some(5),
        ..Default::default()
    };
    let config = PipelineConfig::resolve(&cli, &toml_config).unwrap();

    assert_eq!(config.run_dir, PathBuf::from("/data/runs/catalog"));
    assert_eq!(config.api.base_url, "https://batch.example.com/v1");
    assert_eq!(config.api.api_key.as_deref(), Some("toml-key"));
    assert_eq!(config.api.model, "gpt-4.1-mini");
    assert_eq!(config.monitor.poll_interval, Duration::from_secs(5));
    assert_eq!(config.monitor.max_retries, 8);
    assert_eq!(config.api.completion_window, "24h");
}

#[test]
#[serial]
fn test_environment_overrides_toml() {
    clear_env();
    std::env::set_var(API_KEY_ENV_VAR, "env-key");
    std::env::set_var(RUN_DIR_ENV_VAR, "/tmp/env-run");

    let config = PipelineConfig::resolve(&CliOverrides::default(), &toml_fixture()).unwrap();
    clear_env();

    assert_eq!(config.api.api_key.as_deref(), Some("env-key"));
    assert_eq!(config.run_dir, PathBuf::from("/tmp/env-run"));
}

#[test]
#[serial]
fn test_config_env_var_must_name_existing_file() {
    clear_env();
    std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/tagger/config.toml");

    let result = locate_config_file(None);
    clear_env();

    assert!(result.unwrap_err().to_string().contains("Config file not found"));
}

#[test]
#[serial]
fn test_zero_poll_interval_is_rejected() {
    clear_env();
    let toml_config = TomlConfig {
        poll_interval_secs: Some(0),
        ..Default::default()
    };

    let err = PipelineConfig::resolve(&CliOverrides::default(), &toml_config).unwrap_err();
    assert!(err.to_string().contains("poll_interval_secs"));
}

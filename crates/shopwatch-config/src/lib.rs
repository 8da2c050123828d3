use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Path of the append-only log file to tail.
    #[serde(default = "default_log_path")]
    pub log_path: String,
    /// Delay between existence checks while waiting for the log file to appear.
    #[serde(default = "default_exists_retry_seconds")]
    pub exists_retry_seconds: u64,
    /// Poll interval used when the native filesystem watcher is unavailable.
    #[serde(default = "default_poll_fallback_seconds")]
    pub poll_fallback_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Destination of the tabular checkpoint file.
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
    /// Wall-clock interval between snapshot buffer flushes.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            exists_retry_seconds: default_exists_retry_seconds(),
            poll_fallback_seconds: default_poll_fallback_seconds(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
            flush_interval_seconds: default_flush_interval_seconds(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

fn default_log_path() -> String {
    "logs/ecommerce.log".to_string()
}

fn default_exists_retry_seconds() -> u64 {
    2
}

fn default_poll_fallback_seconds() -> u64 {
    2
}

fn default_checkpoint_path() -> String {
    "~/.shopwatch/metrics.csv".to_string()
}

fn default_flush_interval_seconds() -> f64 {
    300.0
}

pub fn expand_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), stripped);
        }
    }
    path.to_string()
}

fn home_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".shopwatch").join("config.toml"))
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/shopwatch.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_keys: &[&str],
    home_path: Option<PathBuf>,
    repo_default: PathBuf,
) -> PathBuf {
    if let Some(path) = raw_path {
        return path;
    }

    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
    }

    if let Some(path) = home_path {
        if path.exists() {
            return path;
        }
    }

    if repo_default.exists() {
        return repo_default;
    }

    home_config_path().unwrap_or(repo_default)
}

pub fn resolve_config_path(raw_path: Option<PathBuf>) -> PathBuf {
    resolve_config_path_with_overrides(
        raw_path,
        &["SHOPWATCH_CONFIG"],
        home_config_path(),
        repo_default_config_path(),
    )
}

fn normalize_config(mut cfg: AppConfig) -> AppConfig {
    cfg.source.log_path = expand_path(&cfg.source.log_path);
    cfg.checkpoint.path = expand_path(&cfg.checkpoint.path);
    cfg
}

/// Loads configuration from a TOML file. A missing file is an error; callers
/// that want pure defaults should pass a path produced by `resolve_config_path`
/// only when it exists, or use `load_config_or_default`.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
    let cfg: AppConfig = toml::from_str(&content).context("failed to parse TOML config")?;
    Ok(normalize_config(cfg))
}

/// Like `load_config`, but falls back to built-in defaults when the resolved
/// path does not exist. A file that exists but fails to parse is still an
/// error.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<AppConfig> {
    if !path.as_ref().exists() {
        return Ok(normalize_config(AppConfig::default()));
    }
    load_config(path)
}

//! Configuration loader and validator for the channel harvester.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub harvest: HarvestSettings,
    #[serde(default)]
    pub extractor: ExtractorSettings,
    pub browser: BrowserSettings,
}

/// Where the harvester keeps its files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub checkpoint_dir: Option<String>,
    #[serde(default)]
    pub export_dir: Option<String>,
}

/// Concurrency, batching and retry knobs of the fetch stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarvestSettings {
    pub max_concurrent_requests: usize,
    pub batch_size: usize,
    pub retry_limit: u32,
    pub retry_backoff_ms: u64,
    pub task_timeout_secs: u64,
}

/// Extraction engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractorSettings {
    pub program: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Rendering service used to read the channel page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserSettings {
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_browser_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_database_file() -> String {
    "youtube_data.db".to_string()
}

fn default_browser_retry_limit() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    20
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 60,
            batch_size: 10,
            retry_limit: 3,
            retry_backoff_ms: 1000,
            task_timeout_secs: 30,
        }
    }
}

impl HarvestSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_limit,
            backoff_unit: Duration::from_millis(self.retry_backoff_ms),
            timeout: Duration::from_secs(self.task_timeout_secs),
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            user_agent: None,
            extra_args: Vec::new(),
        }
    }
}

impl App {
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        match &self.checkpoint_dir {
            Some(dir) if !dir.trim().is_empty() => expand_home(dir),
            _ => self.resolved_data_dir().join("checkpoints"),
        }
    }

    pub fn export_dir(&self) -> PathBuf {
        match &self.export_dir {
            Some(dir) if !dir.trim().is_empty() => expand_home(dir),
            _ => self.resolved_data_dir().join("exports"),
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}",
            self.resolved_data_dir().join(&self.database_file).display()
        )
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Ensure data, checkpoint and export directories exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())?;
        fs::create_dir_all(self.app.checkpoint_dir())?;
        fs::create_dir_all(self.app.export_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.database_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.database_file must be non-empty"));
    }

    let h = &cfg.harvest;
    if h.max_concurrent_requests == 0 {
        return Err(ConfigError::Invalid("harvest.max_concurrent_requests must be > 0"));
    }
    if h.batch_size == 0 {
        return Err(ConfigError::Invalid("harvest.batch_size must be > 0"));
    }
    if h.retry_limit == 0 {
        return Err(ConfigError::Invalid("harvest.retry_limit must be > 0"));
    }
    if h.task_timeout_secs == 0 {
        return Err(ConfigError::Invalid("harvest.task_timeout_secs must be > 0"));
    }

    if cfg.extractor.program.trim().is_empty() {
        return Err(ConfigError::Invalid("extractor.program must be non-empty"));
    }

    if cfg.browser.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("browser.endpoint must be non-empty"));
    }
    if cfg.browser.retry_limit == 0 {
        return Err(ConfigError::Invalid("browser.retry_limit must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML shipped with the harvester.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  database_file: "youtube_data.db"

harvest:
  max_concurrent_requests: 60
  batch_size: 10
  retry_limit: 3
  retry_backoff_ms: 1000
  task_timeout_secs: 30

extractor:
  program: "yt-dlp"
  user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/126.0.0.0 Safari/537.36"
  extra_args: []

browser:
  endpoint: "http://localhost:3000"
  retry_limit: 3
  request_timeout_secs: 20
"#
}

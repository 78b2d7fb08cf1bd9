//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use spendline_core::{ApiSettings, DEFAULT_DEDUP_KEYS, DEFAULT_USER_AGENT, DownloadSettings};
use spendline_usaspending::{
    DEFAULT_API_ROOT, DEFAULT_CHUNK_DAYS, DEFAULT_MAX_RPS, DEFAULT_MIN_SPLIT_DAYS,
    DEFAULT_OUTPUT_DIR, PipelineSettings,
};

/// Environment override for the request rate
pub const MAX_RPS_ENV: &str = "USASPENDING_MAX_RPS";

/// Global configuration for spendline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub download: DownloadConfig,
    pub bulk: BulkConfig,
    pub incremental: IncrementalConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub max_rps: f64,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub user_agent: Option<String>,
    pub request_timeout_secs: u64,
    pub retry_budget_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_ROOT.to_string(),
            max_rps: DEFAULT_MAX_RPS,
            user_agent: None,
            request_timeout_secs: 30,
            retry_budget_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// How long to wait for a generated export to become servable
    pub probe_budget_secs: u64,
    pub probe_cap_secs: u64,
    pub fetch_cap_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            probe_budget_secs: 45 * 60,
            probe_cap_secs: 30,
            fetch_cap_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub poll_interval_secs: u64,
    /// Consecutive exception-bearing polls before a job counts as failed (0 = off)
    pub exception_threshold: u32,
    pub min_split_days: u32,
    pub file_format: String,
    pub date_type: String,
    pub convert: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            exception_threshold: 3,
            min_split_days: DEFAULT_MIN_SPLIT_DAYS,
            file_format: "csv".to_string(),
            date_type: "action_date".to_string(),
            convert: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    pub chunk_days: u32,
    pub format: String,
    /// Search fields; empty keeps the built-in list
    pub fields: Vec<String>,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            chunk_days: DEFAULT_CHUNK_DAYS,
            format: "parquet".to_string(),
            fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_dir: PathBuf,
    pub compression_level: i32,
    pub dedup_keys: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            compression_level: 3,
            dedup_keys: DEFAULT_DEDUP_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./spendline.toml (current directory)
    /// 2. ~/.config/spendline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("spendline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "spendline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `USASPENDING_MAX_RPS` if set
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(MAX_RPS_ENV) {
            self.api.max_rps = parse_rps(&raw)
                .with_context(|| format!("Invalid {MAX_RPS_ENV}={raw}"))?;
        }
        Ok(())
    }

    /// Transport settings for the pipeline
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let user_agent = self
            .api
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let d = &self.download;
        PipelineSettings {
            api_root: self.api.base_url.clone(),
            max_rps: self.api.max_rps,
            api: ApiSettings {
                user_agent: user_agent.clone(),
                request_timeout: Duration::from_secs(self.api.request_timeout_secs),
                retry_budget: Duration::from_secs(self.api.retry_budget_secs),
                ..Default::default()
            },
            download: DownloadSettings {
                user_agent,
                connect_timeout: Duration::from_secs(d.connect_timeout_secs),
                read_timeout: Duration::from_secs(d.read_timeout_secs),
                probe_budget: Duration::from_secs(d.probe_budget_secs),
                probe_cap: Duration::from_secs(d.probe_cap_secs),
                fetch_cap: Duration::from_secs(d.fetch_cap_secs),
                ..Default::default()
            },
        }
    }
}

/// Requests per second; must be positive and finite
pub fn parse_rps(s: &str) -> Result<f64> {
    let rps: f64 = s.trim().parse().context("not a number")?;
    anyhow::ensure!(rps.is_finite() && rps > 0.0, "must be a positive number");
    Ok(rps)
}

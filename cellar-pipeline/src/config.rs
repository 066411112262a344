//! Configuration for cellar-pipeline
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--source, --batch-size, --limit, --offline)
//! 2. Environment variables (CELLAR_CONFIG, CELLAR_ENRICHMENT_API_KEY)
//! 3. TOML configuration file (`cellar.toml`)
//! 4. Built-in defaults
//!
//! A missing TOML file is not an error; defaults are used and a warning is
//! logged.

use cellar_common::config::{default_data_dir, load_toml_or_default, LoggingConfig};
use cellar_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::services::normalizer::Tolerances;
use crate::utils::retry::RetryPolicy;
use crate::workflow::batch_runner::RunnerOptions;

/// Environment variable holding the enrichment API key
pub const ENRICHMENT_API_KEY_ENV: &str = "CELLAR_ENRICHMENT_API_KEY";

/// Full configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub image_lookup: ImageLookupConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[pipeline]`: the batch run
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Source dataset (JSON array of records)
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum items per run
    #[serde(default = "default_item_limit")]
    pub item_limit: usize,

    /// Write committed batches to `processed_dir` instead of the store
    #[serde(default)]
    pub offline_mode: bool,

    /// Checkpoint directory
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Offline batch directory
    #[serde(default)]
    pub processed_dir: Option<PathBuf>,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default)]
    pub batch_delay_jitter_ms: u64,

    /// Attempts per external call, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_item_limit() -> usize {
    100
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            batch_size: default_batch_size(),
            item_limit: default_item_limit(),
            offline_mode: false,
            state_dir: None,
            processed_dir: None,
            batch_delay_ms: default_batch_delay_ms(),
            batch_delay_jitter_ms: 0,
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join("state"))
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.processed_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join("processed_batches"))
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            batch_size: self.batch_size,
            item_limit: self.item_limit,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            batch_delay_jitter: Duration::from_millis(self.batch_delay_jitter_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_delay_ms)
    }
}

/// Record store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Http,
}

/// `[store]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// SQLite file (default: data dir `cellar.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// REST base URL, required for `kind = "http"`
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StoreConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("cellar.db"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }
}

/// `[enrichment]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(60))
    }

    /// API key: environment first, then TOML
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_api_key(std::env::var(ENRICHMENT_API_KEY_ENV).ok(), self.api_key.clone())
    }
}

fn resolve_api_key(env_key: Option<String>, toml_key: Option<String>) -> Option<String> {
    let valid = |key: &String| !key.trim().is_empty();

    if let Some(key) = env_key.filter(valid) {
        info!("Enrichment API key loaded from environment variable");
        return Some(key);
    }
    if let Some(key) = toml_key.filter(valid) {
        info!("Enrichment API key loaded from TOML config");
        return Some(key);
    }
    None
}

/// `[image_lookup]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageLookupConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ImageLookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(15))
    }
}

/// One provenance source, listed lowest precedence first
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Files or directories of `*.json`
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// `[consolidation]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsolidationConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// `[normalization]`
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizationConfig {
    #[serde(default = "default_volume_tolerance")]
    pub volume_tolerance_ml: f64,
    #[serde(default = "default_abv_tolerance")]
    pub abv_tolerance: f64,
}

fn default_volume_tolerance() -> f64 {
    1.0
}

fn default_abv_tolerance() -> f64 {
    0.5
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            volume_tolerance_ml: default_volume_tolerance(),
            abv_tolerance: default_abv_tolerance(),
        }
    }
}

impl NormalizationConfig {
    pub fn tolerances(&self) -> Tolerances {
        Tolerances {
            volume_ml: self.volume_tolerance_ml,
            abv: self.abv_tolerance,
        }
    }
}

impl TomlConfig {
    /// Load from a resolved path, or defaults when there is none
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            return Err(Error::Config("pipeline.batch_size must be at least 1".to_string()));
        }
        if self.pipeline.item_limit == 0 {
            return Err(Error::Config("pipeline.item_limit must be at least 1".to_string()));
        }
        if self.store.kind == StoreKind::Http && self.store.base_url.is_none() {
            return Err(Error::Config("store.base_url is required when store.kind = \"http\"".to_string()));
        }
        let tolerances = self.normalization.tolerances();
        if tolerances.volume_ml < 0.0 || tolerances.abv < 0.0 {
            return Err(Error::Config("normalization tolerances must not be negative".to_string()));
        }
        Ok(())
    }
}

//! Run configuration.
//!
//! Everything here is read once at run start and never changes afterwards.
//! [`GeneratorConfig`] is the on-disk TOML form; [`GenerationOptions`] is the
//! per-run view handed to the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Per-unit timeout applied when none (or zero) is configured.
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(300);

/// Observer fired once per completed unit with `(name, index, total)`.
pub type ProgressCallback = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Generation Options
// ============================================================================

/// Immutable per-run options.
#[derive(Clone)]
pub struct GenerationOptions {
    model_timeout: Duration,
    pub latest_version_only: bool,
    pub progress_callback: Option<ProgressCallback>,
}

impl GenerationOptions {
    pub fn new(model_timeout: Duration) -> Self {
        Self::default().with_model_timeout(model_timeout)
    }

    /// A zero timeout falls back to [`DEFAULT_MODEL_TIMEOUT`].
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = if timeout.is_zero() {
            DEFAULT_MODEL_TIMEOUT
        } else {
            timeout
        };
        self
    }

    pub fn with_latest_version_only(mut self, latest_only: bool) -> Self {
        self.latest_version_only = latest_only;
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn model_timeout(&self) -> Duration {
        self.model_timeout
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            latest_version_only: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for GenerationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationOptions")
            .field("model_timeout", &self.model_timeout)
            .field("latest_version_only", &self.latest_version_only)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

// ============================================================================
// File Config
// ============================================================================

/// Top-level generator config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Root of the versioned artifact tree
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Local CSV ledger, one row per finished unit
    #[serde(default)]
    pub ledger_file: Option<PathBuf>,

    /// Maximum number of units in flight at once
    #[serde(default = "default_admission_capacity")]
    pub admission_capacity: usize,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub latest_version_only: bool,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub stages: StageConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub artifacthub: ArtifactHubConfig,
}

/// `[rate_limit]` section, applied to the ArtifactHub API only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed between two cooldowns
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Attempts per listing request answered with 429
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff unit; attempt `i` sleeps `2^i` of these
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

/// `[stages]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Concurrent workers per stage
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Repositories promoted to the first stage
    #[serde(default)]
    pub priority_repos: Vec<String>,
}

/// `[ledger]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Remote append endpoint; no remote updates when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// `[artifacthub]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHubConfig {
    #[serde(default = "default_artifacthub_url")]
    pub base_url: String,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on catalog pages requested per listing
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated")
}
fn default_admission_capacity() -> usize {
    20
}
fn default_model_timeout_secs() -> u64 {
    DEFAULT_MODEL_TIMEOUT.as_secs()
}
fn default_true() -> bool {
    true
}
fn default_threshold() -> u64 {
    100
}
fn default_cooldown_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_chunk_size() -> usize {
    50
}
fn default_workers() -> usize {
    9
}
fn default_batch_size() -> usize {
    100
}
fn default_queue_capacity() -> usize {
    256
}
fn default_artifacthub_url() -> String {
    "https://artifacthub.io".into()
}
fn default_page_size() -> usize {
    60
}
fn default_max_pages() -> usize {
    500
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            cooldown_secs: default_cooldown_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            priority_repos: Vec::new(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ArtifactHubConfig {
    fn default() -> Self {
        Self {
            base_url: default_artifacthub_url(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            ledger_file: None,
            admission_capacity: default_admission_capacity(),
            model_timeout_secs: default_model_timeout_secs(),
            latest_version_only: true,
            rate_limit: RateLimitConfig::default(),
            stages: StageConfig::default(),
            ledger: LedgerConfig::default(),
            artifacthub: ArtifactHubConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// Loads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("admission_capacity", self.admission_capacity as u64),
            ("rate_limit.threshold", self.rate_limit.threshold),
            ("rate_limit.max_retries", u64::from(self.rate_limit.max_retries)),
            ("stages.chunk_size", self.stages.chunk_size as u64),
            ("stages.workers", self.stages.workers as u64),
            ("ledger.batch_size", self.ledger.batch_size as u64),
            ("ledger.queue_capacity", self.ledger.queue_capacity as u64),
            ("artifacthub.page_size", self.artifacthub.page_size as u64),
            ("artifacthub.max_pages", self.artifacthub.max_pages as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be greater than 0")));
            }
        }
        Ok(())
    }

    /// Per-run options derived from this config.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions::new(Duration::from_secs(self.model_timeout_secs))
            .with_latest_version_only(self.latest_version_only)
    }
}

//! Runtime configuration.
//!
//! Loaded from YAML. Every section has defaults, so an empty document is a
//! valid configuration. Durations are written the human way: `90s`, `2m`, `24h`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use foresight_core::Calibration;

use crate::registry::{ModelInfo, TokenFloor};

/// Environment variable holding the API key when the config has none.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// Minimum token budgets by model-name substring. First match wins.
    #[serde(default = "default_token_floors")]
    pub token_floors: Vec<TokenFloor>,

    #[serde(default)]
    pub calibration: Calibration,

    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            ensemble: EnsembleConfig::default(),
            token_floors: default_token_floors(),
            calibration: Calibration::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Model provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key. Prefer the `OPENROUTER_API_KEY` environment variable.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Sent as `HTTP-Referer` for provider attribution.
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Sent as `X-Title` for provider attribution.
    #[serde(default = "default_title")]
    pub title: String,

    /// Deadline for a single attempt.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            referer: default_referer(),
            title: default_title(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_referer() -> String {
    "https://localhost".to_string()
}

fn default_title() -> String {
    "Foresight Analyzer".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_min_delay", with = "humantime_serde")]
    pub min_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// No retry starts once this much time has passed since the first attempt.
    #[serde(default = "default_total_budget", with = "humantime_serde")]
    pub total_budget: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            total_budget: default_total_budget(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_total_budget() -> Duration {
    Duration::from_secs(60)
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// JSON snapshot file that keeps the cache across processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: default_cache_ttl(),
            max_entries: default_max_entries(),
            path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_max_entries() -> u64 {
    10_000
}

/// Shape of an ensemble run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default = "default_iterations")]
    pub iterations_per_model: u32,

    /// Queries in flight at once, across all models.
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_true")]
    pub enable_web_search: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            iterations_per_model: default_iterations(),
            concurrency_limit: default_concurrency(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            enable_web_search: true,
        }
    }
}

fn default_iterations() -> u32 {
    10
}

fn default_concurrency() -> usize {
    5
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

pub(crate) fn default_token_floors() -> Vec<TokenFloor> {
    vec![
        TokenFloor::new("gemini", 8000),
        TokenFloor::new("llama", 4000),
        TokenFloor::new("deepseek", 4000),
        TokenFloor::new("qwen", 4000),
    ]
}

/// Additions to the built-in model registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelInfo>,

    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub groups: std::collections::BTreeMap<String, Vec<String>>,
}

impl RuntimeConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load `foresight.yaml` from the working directory if it exists.
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        let path = Path::new("foresight.yaml");
        if path.exists() {
            Ok(Some(Self::load(path)?))
        } else {
            Ok(None)
        }
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ensemble.iterations_per_model == 0 {
            return Err(ConfigError::Invalid(
                "iterations_per_model must be at least 1".to_string(),
            ));
        }
        if self.ensemble.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.ensemble.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within [0, 2], got {}",
                self.ensemble.temperature
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.api.timeout.is_zero() {
            return Err(ConfigError::Invalid("api.timeout must be positive".to_string()));
        }
        self.calibration
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Like [`validate`](Self::validate), and also requires at least one model.
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.ensemble.models.is_empty() {
            return Err(ConfigError::Invalid(
                "no models configured: set ensemble.models or pass --model".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter for `Duration` as a humantime string.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

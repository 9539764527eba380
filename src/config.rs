//! Application configuration.
//!
//! Configuration is loaded from a YAML file with environment-variable
//! overrides for secrets, then validated once at startup. Components receive
//! the validated sections they need in their constructors; nothing reads
//! configuration ad hoc at runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Budget limits and alerting thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Daily spend limit in USD.
    pub daily_budget: f64,
    /// Monthly spend limit in USD.
    pub monthly_budget: f64,
    /// Alert threshold percentages, ascending.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default = "default_exceeded_threshold")]
    pub exceeded_threshold: f64,
    /// When false (the default) budgets are monitoring-only: calls are never
    /// denied, only alerted on. Enable to hard-block calls that would push
    /// spend past a limit.
    #[serde(default)]
    pub block_on_exceeded: bool,
    /// Where alert notifications are addressed (email or webhook URL).
    #[serde(default)]
    pub alert_target: Option<String>,
}

fn default_warning_threshold() -> f64 {
    80.0
}

fn default_critical_threshold() -> f64 {
    95.0
}

fn default_exceeded_threshold() -> f64 {
    100.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget: 50.0,
            monthly_budget: 1000.0,
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            exceeded_threshold: default_exceeded_threshold(),
            block_on_exceeded: false,
            alert_target: None,
        }
    }
}

/// Provider credentials and HTTP settings.
///
/// The chat provider key is required; image and search providers are
/// optional features that stay disabled without a key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub dalle_api_key: Option<String>,
    #[serde(default)]
    pub perplexity_api_key: Option<String>,
    /// Outbound request timeout in seconds. Must not exceed the timeout of
    /// any job that performs provider calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Accept invalid TLS certificates (local/dev proxies only).
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

fn default_request_timeout() -> u64 {
    120
}

/// Pipeline fan-out behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Languages articles are translated into.
    pub active_languages: Vec<String>,
    /// Language content is generated in.
    pub source_language: String,
    /// Enqueue TranslateAllLanguages after generation.
    #[serde(default = "default_true")]
    pub auto_translate: bool,
    /// Enqueue GenerateImage after generation.
    #[serde(default = "default_true")]
    pub auto_image: bool,
    /// Enqueue OptimizeImage after image generation.
    #[serde(default = "default_true")]
    pub optimize_images: bool,
    /// Seconds between successive translation dispatches, to avoid
    /// bursting the provider.
    #[serde(default = "default_stagger")]
    pub translation_stagger_secs: u64,
    /// Platform endpoint publications are POSTed to. Without one the
    /// pipeline runs with a log-only publisher.
    #[serde(default)]
    pub publish_endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_stagger() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            active_languages: vec!["es".into(), "en".into(), "fr".into()],
            source_language: "es".into(),
            auto_translate: true,
            auto_image: true,
            optimize_images: true,
            translation_stagger_secs: default_stagger(),
            publish_endpoint: None,
        }
    }
}

/// Content-cache and idempotency-cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Similarity required to reuse cached content.
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f64,
    /// Entries kept per (language, country) bucket before oldest-eviction.
    #[serde(default = "default_bucket_cap")]
    pub max_entries_per_bucket: usize,
    /// Cache deterministic chat completions keyed by request hash.
    #[serde(default = "default_true")]
    pub idempotent_llm_cache: bool,
    /// Calls at or below this temperature are considered deterministic
    /// enough for the idempotent cache.
    #[serde(default = "default_temperature_ceiling")]
    pub idempotent_temperature_ceiling: f64,
}

fn default_similarity() -> f64 {
    0.95
}

fn default_bucket_cap() -> usize {
    10_000
}

fn default_temperature_ceiling() -> f64 {
    0.3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity(),
            max_entries_per_bucket: default_bucket_cap(),
            idempotent_llm_cache: true,
            idempotent_temperature_ceiling: default_temperature_ceiling(),
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers_per_lane: usize,
}

fn default_workers() -> usize {
    2
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers_per_lane: default_workers(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Hours east of UTC for daily/monthly period boundaries.
    #[serde(default)]
    pub timezone_offset_hours: i32,
    /// Path of the cost-event database. `:memory:` is accepted for tests.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
    /// Address the HTTP API binds to.
    #[serde(default = "default_listen")]
    pub listen_addr: String,
}

fn default_ledger_path() -> String {
    "contentpipe.db".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:8530".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            providers: ProviderConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            timezone_offset_hours: 0,
            ledger_path: default_ledger_path(),
            listen_addr: default_listen(),
        }
    }
}

impl Config {
    /// Load from a YAML file, apply environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a YAML string (no environment overrides). Used by tests.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Secrets come from the environment when present, never from the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.providers.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("DALLE_API_KEY") {
            self.providers.dalle_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("PERPLEXITY_API_KEY") {
            self.providers.perplexity_api_key = Some(key);
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.daily_budget <= 0.0 || self.budget.monthly_budget <= 0.0 {
            return Err(ConfigError::Invalid(
                "daily and monthly budgets must be positive".into(),
            ));
        }
        let t = &self.budget;
        if !(t.warning_threshold < t.critical_threshold
            && t.critical_threshold <= t.exceeded_threshold)
        {
            return Err(ConfigError::Invalid(
                "alert thresholds must be ascending: warning < critical <= exceeded".into(),
            ));
        }
        if self.pipeline.active_languages.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one active language is required".into(),
            ));
        }
        if !self
            .pipeline
            .active_languages
            .contains(&self.pipeline.source_language)
        {
            return Err(ConfigError::Invalid(format!(
                "source language '{}' is not in active_languages",
                self.pipeline.source_language
            )));
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(ConfigError::Invalid(
                "cache similarity threshold must be within [0, 1]".into(),
            ));
        }
        if self.cache.max_entries_per_bucket == 0 {
            return Err(ConfigError::Invalid(
                "cache bucket capacity must be positive".into(),
            ));
        }
        if self.queue.workers_per_lane == 0 {
            return Err(ConfigError::Invalid(
                "at least one worker per lane is required".into(),
            ));
        }
        if !(-12..=14).contains(&self.timezone_offset_hours) {
            return Err(ConfigError::Invalid(
                "timezone offset must be within [-12, +14] hours".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn block_on_exceeded_defaults_to_monitoring_mode() {
        let config = Config::from_yaml("budget:\n  daily_budget: 10\n  monthly_budget: 100\n")
            .unwrap();
        assert!(!config.budget.block_on_exceeded);
    }

    #[test]
    fn rejects_descending_thresholds() {
        let mut config = Config::default();
        config.budget.warning_threshold = 99.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_source_language_outside_active_set() {
        let mut config = Config::default();
        config.pipeline.source_language = "ja".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_full_yaml() {
        let yaml = r#"
budget:
  daily_budget: 25.5
  monthly_budget: 400
  block_on_exceeded: true
pipeline:
  active_languages: [es, en, de]
  source_language: es
  translation_stagger_secs: 10
timezone_offset_hours: 2
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.budget.daily_budget, 25.5);
        assert!(config.budget.block_on_exceeded);
        assert_eq!(config.pipeline.active_languages.len(), 3);
        assert_eq!(config.timezone_offset_hours, 2);
    }
}

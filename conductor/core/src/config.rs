//! TOML Configuration File Support
//!
//! Pipeline defaults (retry, stream buffering and deadline, batch ceiling,
//! repetition detection) load from `~/.config/conductor/stream.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. Environment variables (`CONDUCTOR_*`)
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! delay_ms = 250
//! backoff_multiplier = 2.0
//! max_delay_ms = 8000
//! attempt_timeout_ms = 30000
//! jitter = true
//!
//! [stream]
//! channel_capacity = 64   # 0 = unbounded
//! timeout_ms = 120000
//!
//! [batch]
//! max_concurrency = 8
//!
//! [stop]
//! repetition_similarity = 0.8
//! repetition_window = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::BatchScheduler;
use crate::orchestrator::{RetryPolicy, RunOptions};
use crate::stop::{RepetitionStop, DEFAULT_SIMILARITY};
use crate::streaming::ChannelCapacity;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the effective settings came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// At least one environment variable applied
    Env,
    /// Loaded from the TOML file
    File,
    /// Built-in defaults only
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[retry]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Total attempts including the first
    pub max_attempts: Option<u32>,

    /// Initial backoff delay in milliseconds
    pub delay_ms: Option<u64>,

    /// Backoff multiplier
    pub backoff_multiplier: Option<f64>,

    /// Backoff cap in milliseconds
    pub max_delay_ms: Option<u64>,

    /// Per-attempt deadline in milliseconds
    pub attempt_timeout_ms: Option<u64>,

    /// Add jitter to backoff
    pub jitter: Option<bool>,
}

/// `[stream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Event buffer size between decoder and consumer (0 = unbounded)
    pub channel_capacity: Option<usize>,

    /// Overall stream deadline in milliseconds
    pub timeout_ms: Option<u64>,
}

/// `[batch]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchToml {
    /// Maximum requests in flight
    pub max_concurrency: Option<usize>,
}

/// `[stop]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopToml {
    /// Character-set similarity threshold for repetition detection
    pub repetition_similarity: Option<f64>,

    /// Characters of recent output kept for repetition detection
    pub repetition_window: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Retry section
    pub retry: RetryToml,

    /// Stream section
    pub stream: StreamToml,

    /// Batch section
    pub batch: BatchToml,

    /// Stop-condition section
    pub stop: StopToml,
}

// =============================================================================
// Effective Settings
// =============================================================================

/// Effective pipeline settings after merging all sources
#[derive(Clone, Debug)]
pub struct ConductorSettings {
    /// Retry policy for orchestrated operations
    pub retry: RetryPolicy,

    /// Buffering between decoder and consumer
    pub channel_capacity: ChannelCapacity,

    /// Overall deadline for consuming a stream
    pub stream_timeout: Option<Duration>,

    /// Batch concurrency ceiling
    pub max_concurrency: usize,

    /// Repetition similarity threshold
    pub repetition_similarity: f64,

    /// Repetition window in characters
    pub repetition_window: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            channel_capacity: ChannelCapacity::Unbounded,
            stream_timeout: None,
            max_concurrency: 4,
            repetition_similarity: DEFAULT_SIMILARITY,
            repetition_window: 1000,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConductorSettings {
    /// Where these settings came from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Orchestrator options with a fresh cancellation token
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        let options = RunOptions::new().with_retry(self.retry.clone());
        match self.stream_timeout {
            Some(timeout) => options.with_stream_timeout(timeout),
            None => options,
        }
    }

    /// Batch scheduler with the configured ceiling
    #[must_use]
    pub fn scheduler(&self) -> BatchScheduler {
        BatchScheduler::new(self.max_concurrency)
    }

    /// Repetition detector with the configured window and threshold
    #[must_use]
    pub fn repetition_stop(&self) -> RepetitionStop {
        RepetitionStop::new(self.repetition_window).with_similarity(self.repetition_similarity)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "retry.backoff_multiplier must be >= 1.0, got {multiplier}"
            )));
        }
        if self.retry.max_delay < self.retry.delay {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must not be below retry.delay_ms".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "batch.max_concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.repetition_similarity) {
            return Err(ConfigError::ValidationError(format!(
                "stop.repetition_similarity must be within 0.0..=1.0, got {}",
                self.repetition_similarity
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/conductor/stream.toml` or
/// `~/.config/conductor/stream.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("conductor").join("stream.toml"))
}

/// Load settings from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the merged values are invalid. A missing file is not an error.
pub fn load_settings() -> Result<ConductorSettings, ConfigError> {
    load_settings_from_path(default_config_path().as_deref(), |key| {
        std::env::var(key).ok()
    })
}

/// Load settings from `path` and an environment lookup
///
/// # Errors
///
/// Same as [`load_settings`].
pub fn load_settings_from_path(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConductorSettings, ConfigError> {
    let mut settings = ConductorSettings::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;

            let toml_config: ConductorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut settings, &toml_config);
            settings.config_file_path = Some(config_path.to_path_buf());
            settings.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

fn apply_toml_config(settings: &mut ConductorSettings, toml: &ConductorToml) {
    let retry = &mut settings.retry;
    if let Some(attempts) = toml.retry.max_attempts {
        retry.max_attempts = attempts;
    }
    if let Some(ms) = toml.retry.delay_ms {
        retry.delay = Duration::from_millis(ms);
    }
    if let Some(multiplier) = toml.retry.backoff_multiplier {
        retry.backoff_multiplier = multiplier;
    }
    if let Some(ms) = toml.retry.max_delay_ms {
        retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.retry.attempt_timeout_ms {
        retry.attempt_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(jitter) = toml.retry.jitter {
        retry.jitter = jitter;
    }

    if let Some(capacity) = toml.stream.channel_capacity {
        settings.channel_capacity = channel_capacity(capacity);
    }
    if let Some(ms) = toml.stream.timeout_ms {
        settings.stream_timeout = Some(Duration::from_millis(ms));
    }

    if let Some(max) = toml.batch.max_concurrency {
        settings.max_concurrency = max;
    }

    if let Some(similarity) = toml.stop.repetition_similarity {
        settings.repetition_similarity = similarity;
    }
    if let Some(window) = toml.stop.repetition_window {
        settings.repetition_window = window;
    }
}

fn apply_env_config(settings: &mut ConductorSettings, env: impl Fn(&str) -> Option<String>) {
    let mut applied = false;
    let mut parsed = |key: &str| -> Option<u64> {
        let value = env(key)?;
        match value.trim().parse::<u64>() {
            Ok(n) => {
                applied = true;
                Some(n)
            }
            Err(_) => {
                tracing::warn!(key, value = %value, "Ignoring non-numeric environment override");
                None
            }
        }
    };

    if let Some(n) = parsed("CONDUCTOR_MAX_ATTEMPTS") {
        settings.retry.max_attempts = u32::try_from(n).unwrap_or(u32::MAX);
    }
    if let Some(ms) = parsed("CONDUCTOR_RETRY_DELAY_MS") {
        settings.retry.delay = Duration::from_millis(ms);
    }
    if let Some(ms) = parsed("CONDUCTOR_MAX_RETRY_DELAY_MS") {
        settings.retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = parsed("CONDUCTOR_ATTEMPT_TIMEOUT_MS") {
        settings.retry.attempt_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(n) = parsed("CONDUCTOR_CHANNEL_CAPACITY") {
        settings.channel_capacity = channel_capacity(n as usize);
    }
    if let Some(ms) = parsed("CONDUCTOR_STREAM_TIMEOUT_MS") {
        settings.stream_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(n) = parsed("CONDUCTOR_MAX_CONCURRENCY") {
        settings.max_concurrency = n as usize;
    }

    if let Some(jitter) = env("CONDUCTOR_RETRY_JITTER") {
        settings.retry.jitter = jitter != "0" && jitter.to_lowercase() != "false";
        applied = true;
    }

    if applied {
        settings.source = ConfigSource::Env;
    }
}

fn channel_capacity(size: usize) -> ChannelCapacity {
    match size {
        0 => ChannelCapacity::Unbounded,
        n => ChannelCapacity::Bounded(n),
    }
}

//! Configuration management for the dispatcher.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispatch::{PacingPolicy, RetryPolicy};
use crate::error::{DispatchError, Result};

/// Prefix for environment overrides, e.g. `RATEDISPATCH_PACING__RATE=5`.
const ENV_PREFIX: &str = "RATEDISPATCH";

/// Main configuration for a dispatch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Admission pacing
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Per-request processing
    #[serde(default)]
    pub work: WorkConfig,

    /// The batch to dispatch
    #[serde(default)]
    pub batch: BatchConfig,

    /// Console output
    #[serde(default)]
    pub output: OutputConfig,
}

/// Pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Requests admitted per window
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Requests admitted immediately before pacing begins
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Window length in milliseconds; derived as `1000 / rate` when unset
    #[serde(default)]
    pub window_ms: Option<u64>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
            window_ms: None,
        }
    }
}

fn default_rate() -> u32 {
    2
}

fn default_burst() -> u32 {
    2
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkConfig {
    /// Simulated processing time per request in milliseconds
    #[serde(default = "default_work_duration")]
    pub duration_ms: u64,

    /// Additional attempts after a failed one
    #[serde(default)]
    pub max_retries: u32,

    /// Initial delay between attempts in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a single attempt in milliseconds
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_work_duration(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff(),
            task_timeout_ms: None,
        }
    }
}

fn default_work_duration() -> u64 {
    100
}

fn default_retry_backoff() -> u64 {
    50
}

/// Batch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of requests in the batch
    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Label prefix; request `i` is labelled `<prefix><i>`
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            label_prefix: default_label_prefix(),
        }
    }
}

fn default_requests() -> usize {
    10
}

fn default_label_prefix() -> String {
    "Request ".to_string()
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Echo progress lines to stdout
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            progress: default_progress(),
        }
    }
}

fn default_progress() -> bool {
    true
}

impl DispatcherConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| DispatchError::Config(format!("Failed to parse dispatcher config: {}", e)))
    }

    /// Load configuration from a YAML file, then apply `RATEDISPATCH_*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading dispatcher configuration");

        if !path.exists() {
            return Err(DispatchError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        Self::layered(Some(path))
    }

    /// Defaults with `RATEDISPATCH_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::layered(None)
    }

    fn layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder =
                builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Build the pacing policy described by this configuration.
    pub fn pacing_policy(&self) -> Result<PacingPolicy> {
        let policy = match self.pacing.window_ms {
            Some(ms) => PacingPolicy::new(
                self.pacing.rate,
                self.pacing.burst,
                Duration::from_millis(ms),
            ),
            None => PacingPolicy::per_second(self.pacing.rate, self.pacing.burst),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        self.pacing_policy().map(|_| ())
    }

    /// Labels for the configured batch, numbered from 1.
    pub fn labels(&self) -> Vec<String> {
        (1..=self.batch.requests)
            .map(|i| format!("{}{}", self.batch.label_prefix, i))
            .collect()
    }

    /// Simulated processing time per request.
    pub fn work_duration(&self) -> Duration {
        Duration::from_millis(self.work.duration_ms)
    }

    /// Retry and timeout settings for each request.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.work.max_retries,
            initial_backoff: Duration::from_millis(self.work.retry_backoff_ms),
            task_timeout: self.work.task_timeout_ms.map(Duration::from_millis),
        }
    }
}

//! Configuration types for cloud-dl

use crate::error::{Error, Result};
use crate::source::Credential;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Concurrency limits for the phase pipeline
///
/// Groups settings that bound how much work is in flight at once.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Slots in each phase's admission gate (default: 20)
    #[serde(default = "default_download_threads")]
    pub download_threads: usize,

    /// Number of item tasks launched per batch (default: 30)
    ///
    /// Launching thousands of tasks at once under a small gate makes cancellation
    /// expensive, because every queued task has to unwind. Batches keep the number
    /// of pending-but-not-admitted tasks small.
    #[serde(default = "default_task_chunk_size")]
    pub task_chunk_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            download_threads: default_download_threads(),
            task_chunk_size: default_task_chunk_size(),
        }
    }
}

/// Cooldown and retry behavior for calls to rate-limited remote services
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (default: 6)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Minimum wall-clock time of one request, and the first backoff delay (default: 210ms)
    #[serde(default = "default_cooldown", with = "duration_millis")]
    pub cooldown: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to backoff delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            cooldown: default_cooldown(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Minimum duration of one per-item request issued from `threads` concurrent workers
    ///
    /// Every worker shares the remote quota, so each one keeps its own requests
    /// `threads` times further apart than a single caller would.
    pub fn per_item_cooldown(&self, threads: usize) -> Duration {
        let factor = u32::try_from(threads.max(1)).unwrap_or(u32::MAX);
        self.cooldown.saturating_mul(factor)
    }
}

/// Main configuration for cloud-dl
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Concurrency limits
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Cooldown and retry behavior
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.download_threads == 0 {
            return Err(config_error(
                "download_threads must be at least 1",
                "concurrency.download_threads",
            ));
        }
        if self.concurrency.task_chunk_size == 0 {
            return Err(config_error(
                "task_chunk_size must be at least 1",
                "concurrency.task_chunk_size",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be a finite number, 1.0 or greater",
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }
}

/// Input for one download run
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Directory downloaded files are written under
    pub target_directory: PathBuf,
    /// Whether to download file contents, or stop after meta-information
    pub download_files: bool,
    /// Opaque credential produced by the OAuth collaborator
    pub credential: Credential,
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_download_threads() -> usize {
    20
}

fn default_task_chunk_size() -> usize {
    30
}

fn default_max_attempts() -> u32 {
    6
}

fn default_cooldown() -> Duration {
    Duration::from_millis(210)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Durations are written as whole milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

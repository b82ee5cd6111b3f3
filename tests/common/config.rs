//! Test configuration and run settings

use std::path::Path;
use std::time::Duration;

use cloud_dl::{ConcurrencyConfig, Config, Credential, RetryConfig, RunSettings};

/// Credential the fake authenticator accepts
pub const GOOD_TOKEN: &str = "1//valid-refresh-token";

/// Config without cooldowns, two download slots and batches of two
pub fn fast_config() -> Config {
    Config {
        concurrency: ConcurrencyConfig {
            download_threads: 2,
            task_chunk_size: 2,
        },
        retry: RetryConfig {
            cooldown: Duration::ZERO,
            max_attempts: 3,
            ..RetryConfig::default()
        },
    }
}

/// Settings for a run into `target` with the accepted credential
pub fn settings(target: &Path, download_files: bool) -> RunSettings {
    RunSettings {
        target_directory: target.to_path_buf(),
        download_files,
        credential: Credential::new(GOOD_TOKEN),
    }
}

//! Configuration types for drpg

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::naming::NamingMode;

/// How library paths are built
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Name files and directories the way the storefront's own client app does
    #[serde(default)]
    pub compatibility_mode: bool,

    /// Drop the publisher directory level
    #[serde(default)]
    pub omit_publisher: bool,
}

impl NamingConfig {
    /// Naming mode selected by `compatibility_mode`
    pub fn mode(&self) -> NamingMode {
        if self.compatibility_mode {
            NamingMode::Compatibility
        } else {
            NamingMode::Friendly
        }
    }
}

/// Retry behavior for transient failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Timeouts for network operations; expiry counts as a transient failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Each catalog request (token, product page, file task) (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub catalog_request: Duration,

    /// Acquiring a download URL, including waiting for the file to be prepared (default: 5 minutes)
    #[serde(default = "default_download_url_timeout", with = "duration_serde")]
    pub download_url: Duration,

    /// Longest wait for the next chunk of a file body (default: 60 seconds)
    #[serde(default = "default_stall_timeout", with = "duration_serde")]
    pub download_stall: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            catalog_request: default_request_timeout(),
            download_url: default_download_url_timeout(),
            download_stall: default_stall_timeout(),
        }
    }
}

/// Main configuration, threaded explicitly through the syncer
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// DriveThruRPG API token
    #[serde(default)]
    pub token: String,

    /// Root of the local library (default: `<documents>/DRPG`)
    #[serde(default = "default_library_path")]
    pub library_path: PathBuf,

    /// Path naming settings
    #[serde(default)]
    pub naming: NamingConfig,

    /// Decide whether existing files need a download by comparing checksums
    #[serde(default)]
    pub use_checksums: bool,

    /// Verify downloads (and already downloaded files) against catalog checksums
    #[serde(default)]
    pub validate: bool,

    /// Plan only; no downloads, no writes
    #[serde(default)]
    pub dry_run: bool,

    /// Number of concurrent download workers (default: 5)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Network timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Delay between polls while the storefront prepares a file (default: 3 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub file_task_poll_interval: Duration,

    /// Products requested per catalog page (default: 100)
    #[serde(default = "default_per_page")]
    pub products_per_page: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            library_path: default_library_path(),
            naming: NamingConfig::default(),
            use_checksums: false,
            validate: false,
            dry_run: false,
            threads: default_threads(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            file_task_poll_interval: default_poll_interval(),
            products_per_page: default_per_page(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &"******")
            .field("library_path", &self.library_path)
            .field("naming", &self.naming)
            .field("use_checksums", &self.use_checksums)
            .field("validate", &self.validate)
            .field("dry_run", &self.dry_run)
            .field("threads", &self.threads)
            .field("retry", &self.retry)
            .field("timeouts", &self.timeouts)
            .field("file_task_poll_interval", &self.file_task_poll_interval)
            .field("products_per_page", &self.products_per_page)
            .finish()
    }
}

impl Config {
    /// Check settings that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(config_error("an API token is required", "token"));
        }
        if self.threads == 0 {
            return Err(config_error("threads must be at least 1", "threads"));
        }
        if self.products_per_page == 0 {
            return Err(config_error(
                "products_per_page must be at least 1",
                "products_per_page",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }

    /// Whether the planner compares local checksums with the catalog
    pub fn planner_checksums(&self) -> bool {
        self.use_checksums || self.validate
    }

    /// Whether downloaded bytes are verified before being moved into place
    pub fn verify_downloads(&self) -> bool {
        self.use_checksums || self.validate
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Default library root: `<documents>/DRPG`, falling back to home, then the current directory
pub fn default_library_path() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("DRPG")
}

fn default_threads() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_url_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stall_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_per_page() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

//! Configuration types for relay-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Main configuration for [`Relay`](crate::Relay)
///
/// Every section has defaults, so an empty JSON object is a valid config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// On-disk job store
    #[serde(default)]
    pub store: StoreConfig,

    /// Per-file retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Transfer concurrency and limits
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Crash recovery
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Stall monitor
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Removal of finished job directories
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// External fetch tool
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Check settings that serde cannot express
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("transfer.max_concurrent_uploads", self.transfer.max_concurrent_uploads),
            ("transfer.max_concurrent_downloads", self.transfer.max_concurrent_downloads),
            ("recovery.max_concurrent_recoveries", self.recovery.max_concurrent_recoveries),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(config_error(key, "must be at least 1"));
            }
        }

        if self.monitor.check_interval.is_zero() {
            return Err(config_error("monitor.check_interval", "must be greater than zero"));
        }

        if self.monitor.progress_window > self.monitor.heartbeat_timeout {
            return Err(config_error(
                "monitor.progress_window",
                "must not exceed monitor.heartbeat_timeout",
            ));
        }

        if self.recovery.inactivity_threshold >= self.recovery.max_job_age {
            return Err(config_error(
                "recovery.inactivity_threshold",
                "must be shorter than recovery.max_job_age",
            ));
        }

        if self.retry.backoff_step > self.retry.max_backoff {
            return Err(config_error(
                "retry.backoff_step",
                "must not exceed retry.max_backoff",
            ));
        }

        Ok(())
    }
}

fn config_error(key: &str, message: &str) -> Error {
    Error::Config {
        message: format!("{key} {message}"),
        key: Some(key.to_string()),
    }
}

/// Job store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per job (default: "downloads/jobs")
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,

    /// Keep the previous state record as `job_state.json.bak` on every save (default: true)
    #[serde(default = "default_true")]
    pub keep_backup: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            jobs_dir: default_jobs_dir(),
            keep_backup: true,
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first failed attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff unit; attempt `n` waits `n * backoff_step` (default: 5 seconds)
    #[serde(default = "default_backoff_step", with = "duration_serde")]
    pub backoff_step: Duration,

    /// Upper bound for computed delays (default: 60 seconds)
    ///
    /// Server-specified retry-after durations are honored as given.
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Add random jitter to computed delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_step: default_backoff_step(),
            max_backoff: default_max_backoff(),
            jitter: false,
        }
    }
}

/// Transfer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Concurrent uploads per orchestrator (default: 2)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_uploads: usize,

    /// Concurrent fetch tool invocations (default: 2)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Largest file the transport accepts, in bytes (default: 50 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_max_concurrent(),
            max_concurrent_downloads: default_max_concurrent(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Recovery configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Working jobs idle for longer than this are interrupted (default: 1 hour)
    #[serde(default = "default_inactivity_threshold", with = "duration_serde")]
    pub inactivity_threshold: Duration,

    /// Jobs started longer ago than this are left for the operator (default: 7 days)
    #[serde(default = "default_max_job_age", with = "duration_serde")]
    pub max_job_age: Duration,

    /// Jobs resumed at the same time (default: 2)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_recoveries: usize,

    /// Run a recovery pass when the relay starts (default: true)
    #[serde(default = "default_true")]
    pub recover_on_startup: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: default_inactivity_threshold(),
            max_job_age: default_max_job_age(),
            max_concurrent_recoveries: default_max_concurrent(),
            recover_on_startup: true,
        }
    }
}

/// Stall monitor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time between stall checks (default: 60 seconds)
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// No heartbeat for this long means stalled (default: 600 seconds)
    #[serde(default = "default_heartbeat_timeout", with = "duration_serde")]
    pub heartbeat_timeout: Duration,

    /// Heartbeats without progress for this long also mean stalled (default: 300 seconds)
    #[serde(default = "default_progress_window", with = "duration_serde")]
    pub progress_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            progress_window: default_progress_window(),
        }
    }
}

/// Finished job cleanup
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Terminal jobs that ended longer ago than this are removed (default: 24 hours)
    #[serde(default = "default_finished_job_age", with = "duration_serde")]
    pub finished_job_age: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            finished_job_age: default_finished_job_age(),
        }
    }
}

/// External fetch tool configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Path to the gallery-dl binary (None = search PATH)
    #[serde(default)]
    pub gallery_dl_path: Option<PathBuf>,

    /// gallery-dl configuration file passed with `--config`
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Netscape cookie file passed with `--cookies` and checked before each fetch
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,

    /// Extra arguments appended to every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

// Default value functions
fn default_jobs_dir() -> PathBuf {
    PathBuf::from("downloads/jobs")
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_step() -> Duration {
    Duration::from_secs(5)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_inactivity_threshold() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_max_job_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_progress_window() -> Duration {
    Duration::from_secs(300)
}

fn default_finished_job_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
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

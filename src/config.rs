//! Configuration types for media-dl
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Durations are written in human form (`"250ms"`, `"2s"`,
//! `"1m"`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Queue and worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of jobs downloading at once (default: 3, minimum 1)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,

    /// How long an idle worker slot waits before re-checking the queue (default: 250ms)
    #[serde(default = "default_idle_poll_interval", with = "humantime_serde")]
    pub idle_poll_interval: Duration,

    /// How long to wait for the engine to acknowledge a cancellation (default: 5s)
    #[serde(default = "default_cancel_ack_timeout", with = "humantime_serde")]
    pub cancel_ack_timeout: Duration,

    /// How long shutdown waits for in-flight jobs before forcing them to fail (default: 30s)
    #[serde(default = "default_shutdown_grace_period", with = "humantime_serde")]
    pub shutdown_grace_period: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent(),
            idle_poll_interval: default_idle_poll_interval(),
            cancel_ack_timeout: default_cancel_ack_timeout(),
            shutdown_grace_period: default_shutdown_grace_period(),
        }
    }
}

/// Retry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per job, counting the first (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay (default: 2s)
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on any backoff delay (default: 60s)
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// Scheduler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduler looks for due entries (default: 1s)
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
        }
    }
}

/// Download archive configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Skip items that are already in the archive (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Archive file (default: "./archive.txt")
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_archive_path(),
        }
    }
}

/// Progress reporting configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum interval between progress events for one job (default: 500ms)
    #[serde(default = "default_throttle_interval", with = "humantime_serde")]
    pub throttle_interval: Duration,

    /// Event channel capacity; slower subscribers observe a lag (default: 1000)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            throttle_interval: default_throttle_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// History storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./media-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Keep at most this many history records, pruning the oldest (default: unlimited)
    #[serde(default)]
    pub history_limit: Option<u32>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            history_limit: None,
        }
    }
}

/// External tool discovery
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Explicit path to ffmpeg (default: search PATH)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Search PATH for ffmpeg when no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            search_path: true,
        }
    }
}

/// Main configuration for [`MediaDownloader`](crate::MediaDownloader)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue and worker pool
    #[serde(default)]
    pub queue: QueueConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Scheduler
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Download archive
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Progress events
    #[serde(default)]
    pub progress: ProgressConfig,

    /// History database
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// External tools
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrent_jobs == 0 {
            return Err(invalid("queue.max_concurrent_jobs", "must be at least 1"));
        }
        if self.queue.idle_poll_interval.is_zero() {
            return Err(invalid("queue.idle_poll_interval", "must be greater than zero"));
        }
        if self.scheduler.tick_interval.is_zero() {
            return Err(invalid("scheduler.tick_interval", "must be greater than zero"));
        }
        if self.progress.channel_capacity == 0 {
            return Err(invalid("progress.channel_capacity", "must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid(
                "retry.base_delay",
                "must not be greater than retry.max_delay",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> Error {
    Error::Config {
        message: format!("{key} {message}"),
        key: Some(key.to_string()),
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_idle_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_cancel_ack_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("./archive.txt")
}

fn default_throttle_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}

fn default_true() -> bool {
    true
}

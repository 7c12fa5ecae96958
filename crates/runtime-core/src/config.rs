//! Runtime configuration types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Coordinator (dump scheduler) settings
    pub coordinator: CoordinatorConfig,

    /// Parameter server settings
    pub server: ServerConfig,

    /// FTRL tuning constants
    pub ftrl: FtrlConfig,

    /// Bulk storage settings
    pub storage: StorageConfig,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: RuntimeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the update rule or scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ftrl.alpha.is_nan() || self.ftrl.alpha <= 0.0 {
            return Err(Error::InvalidConfig {
                message: format!("ftrl.alpha must be positive, got {}", self.ftrl.alpha),
            });
        }
        if self.coordinator.num_servers == 0 {
            return Err(Error::InvalidConfig {
                message: "coordinator.num_servers must be at least 1".to_string(),
            });
        }
        if self.coordinator.dump_interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "coordinator.dump_interval must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Number of parameter servers in the cluster
    pub num_servers: usize,

    /// Time between two cluster-wide saves
    #[serde(with = "humantime_serde")]
    pub dump_interval: Duration,

    /// Upper bound on waiting for load acknowledgements
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,

    /// Load the newest valid snapshot before the first save round
    pub load_on_startup: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            num_servers: 1,
            dump_interval: Duration::from_secs(10 * 60),
            load_timeout: Duration::from_secs(10 * 60),
            load_on_startup: true,
        }
    }
}

/// Parameter server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory for locally written snapshot files awaiting upload
    pub local_dir: PathBuf,

    /// Number of async I/O threads
    pub io_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("./model_dump"),
            io_threads: 4,
        }
    }
}

/// FTRL-proximal tuning constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtrlConfig {
    pub alpha: f32,
    pub beta: f32,
    pub lambda1: f32,
    pub lambda2: f32,
}

impl Default for FtrlConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            beta: 0.1,
            lambda1: 5.0,
            lambda2: 0.0,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackendKind,

    /// Upload retry configuration
    pub retry: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Local {
                root: PathBuf::from("./models"),
            },
            retry: RetryConfig::default(),
        }
    }
}

/// Storage backend type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageBackendKind {
    /// Directory on a local or mounted filesystem
    Local { root: PathBuf },

    /// HDFS through the `hadoop fs` command line
    Hadoop { binary: String, model_path: String },
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial delay before first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), before jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor.max(1.0));
        delay.min(self.max_delay)
    }

    /// Delay before retrying after `error`, never shorter than the error's
    /// own hint and never longer than `max_delay`
    pub fn delay_after(&self, attempt: u32, error: &Error) -> Duration {
        let hint = error
            .retry_delay_hint_ms()
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        self.delay_for(attempt).max(hint.min(self.max_delay))
    }

    /// No retries, no delay
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Duration serialization helper for human-readable formats
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

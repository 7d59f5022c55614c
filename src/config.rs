//! Configuration types for unpack-queue

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Top-level configuration
///
/// Every section falls back to its defaults when omitted, so `{}` is a valid
/// configuration document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Concurrency and password-attempt limits
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Streaming, throughput and checkpoint cadence
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Where resumable progress records live
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Parse a JSON configuration document and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(Error::Config {
                message: "max_concurrent must be at least 1".to_string(),
                key: Some("scheduler.max_concurrent".to_string()),
            });
        }
        if self.scheduler.max_password_attempts == 0 {
            return Err(Error::Config {
                message: "max_password_attempts must be at least 1".to_string(),
                key: Some("scheduler.max_password_attempts".to_string()),
            });
        }
        if self.extraction.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be positive".to_string(),
                key: Some("extraction.chunk_size".to_string()),
            });
        }
        if self.extraction.throughput_window.is_zero() {
            return Err(Error::Config {
                message: "throughput_window must be positive".to_string(),
                key: Some("extraction.throughput_window".to_string()),
            });
        }
        Ok(())
    }
}

/// Scheduler limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum extractions running at once (default: 2)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Authentication failures tolerated per task before retries are refused (default: 3)
    #[serde(default = "default_max_password_attempts")]
    pub max_password_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_password_attempts: default_max_password_attempts(),
        }
    }
}

/// Streaming extraction settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Bytes read per iteration of the streaming loop (default: 512 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Optional delay between chunks, in milliseconds (None = full speed)
    ///
    /// Mostly useful to keep long extractions from saturating a slow disk, and
    /// in tests to make cancellation points observable.
    #[serde(default, with = "optional_duration_serde")]
    pub chunk_pacing: Option<Duration>,

    /// Trailing window of the throughput estimator, in milliseconds (default: 2000)
    #[serde(default = "default_throughput_window", with = "duration_serde")]
    pub throughput_window: Duration,

    /// Minimum time between checkpoint writes, in milliseconds (default: 1000)
    #[serde(default = "default_checkpoint_interval", with = "duration_serde")]
    pub checkpoint_interval: Duration,

    /// Minimum progress between checkpoint writes, in bytes (default: 1 MiB)
    #[serde(default = "default_checkpoint_min_bytes")]
    pub checkpoint_min_bytes: u64,

    /// What to do when a materialized entry already exists
    #[serde(default)]
    pub file_collision: CollisionPolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_pacing: None,
            throughput_window: default_throughput_window(),
            checkpoint_interval: default_checkpoint_interval(),
            checkpoint_min_bytes: default_checkpoint_min_bytes(),
            file_collision: CollisionPolicy::default(),
        }
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Skip the file, keep existing
    Skip,
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding one JSON checkpoint per (source, destination) pair
    /// (default: "./checkpoints")
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

// Default value functions
fn default_max_concurrent() -> usize {
    2
}

fn default_max_password_attempts() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    512 * 1024
}

fn default_throughput_window() -> Duration {
    Duration::from_secs(2)
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_checkpoint_min_bytes() -> u64 {
    1024 * 1024
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

// Duration serialization helper (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
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

// Optional Duration serialization helper (milliseconds)
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

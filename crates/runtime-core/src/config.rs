//! Checkpoint storage and garbage collection configuration

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Top-level configuration for a garbage collection run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcConfig {
    /// Where checkpoints live
    pub storage: StorageConfig,

    /// Retry settings for remote backends
    #[serde(default)]
    pub retry: RetryConfig,

    /// Report deletions without performing them
    #[serde(default)]
    pub dry_run: bool,
}

/// Checkpoint storage configuration
///
/// Mirrors the `checkpoint_storage` section of an experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Local or network-shared filesystem
    SharedFs {
        /// Mount point of the shared filesystem
        host_path: PathBuf,

        /// Optional subdirectory under `host_path`
        #[serde(default)]
        storage_path: Option<PathBuf>,
    },

    /// S3-compatible object storage
    S3 {
        bucket: String,

        #[serde(default)]
        prefix: Option<String>,

        /// Custom endpoint (MinIO, LocalStack, ...)
        #[serde(default)]
        endpoint_url: Option<String>,

        #[serde(default)]
        region: Option<String>,

        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::SharedFs {
            host_path: PathBuf::from("./checkpoints"),
            storage_path: None,
        }
    }
}

impl StorageConfig {
    /// Shared filesystem rooted directly at `path`
    pub fn shared_fs(path: impl Into<PathBuf>) -> Self {
        StorageConfig::SharedFs {
            host_path: path.into(),
            storage_path: None,
        }
    }

    /// Short backend name
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::SharedFs { .. } => "shared_fs",
            StorageConfig::S3 { .. } => "s3",
        }
    }

    /// Check the configuration for obviously unusable values
    pub fn validate(&self) -> Result<()> {
        match self {
            StorageConfig::SharedFs {
                host_path,
                storage_path,
            } => {
                if host_path.as_os_str().is_empty() {
                    return Err(Error::InvalidConfig {
                        message: "shared_fs host_path must not be empty".to_string(),
                    });
                }
                if let Some(storage_path) = storage_path {
                    let escapes = storage_path
                        .components()
                        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
                    if escapes {
                        return Err(Error::InvalidConfig {
                            message: format!(
                                "shared_fs storage_path {:?} must be relative and stay under host_path",
                                storage_path
                            ),
                        });
                    }
                }
                Ok(())
            }
            StorageConfig::S3 { bucket, .. } => {
                if bucket.trim().is_empty() {
                    return Err(Error::InvalidConfig {
                        message: "s3 bucket must not be empty".to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Base directory for the shared filesystem backend
    pub fn shared_fs_base_path(&self) -> Option<PathBuf> {
        match self {
            StorageConfig::SharedFs {
                host_path,
                storage_path,
            } => Some(match storage_path {
                Some(sub) => host_path.join(sub),
                None => host_path.clone(),
            }),
            StorageConfig::S3 { .. } => None,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_retries: u32,

    /// Initial delay before first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Load a JSON configuration document from disk
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    tracing::debug!(path = %path.display(), "Loading configuration");
    let contents = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&contents).map_err(|e| Error::InvalidConfig {
        message: format!("Failed to parse {}: {}", path.display(), e),
    })
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

//! Core type definitions for checkpoint storage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Longest storage id accepted (a single path component on common filesystems)
const MAX_STORAGE_ID_LEN: usize = 255;

/// Opaque, globally unique identifier of one checkpoint's storage location
///
/// A `StorageId` is always safe to use as a single path component or object
/// key segment: it never contains separators, never names the current or
/// parent directory, and never starts with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageId(String);

impl StorageId {
    /// Generate a fresh random identifier (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate an identifier
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if let Some(reason) = Self::violation(&value) {
            return Err(Error::InvalidStorageId {
                value,
                reason: reason.to_string(),
            });
        }
        Ok(Self(value))
    }

    fn violation(value: &str) -> Option<&'static str> {
        if value.is_empty() {
            return Some("empty");
        }
        if value.len() > MAX_STORAGE_ID_LEN {
            return Some("longer than 255 bytes");
        }
        if value.contains('/') || value.contains('\\') {
            return Some("contains a path separator");
        }
        if value.starts_with('.') {
            return Some("starts with '.'");
        }
        if value.chars().any(char::is_control) {
            return Some("contains control characters");
        }
        None
    }

    /// Identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for StorageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StorageId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<StorageId> for String {
    fn from(id: StorageId) -> Self {
        id.0
    }
}

/// A storage id resolved to a concrete local directory
///
/// Only lives for the duration of a write or read; the `StorageId` is the
/// durable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHandle {
    /// Identifier of the checkpoint
    pub storage_id: StorageId,

    /// Backend-resolved directory holding the checkpoint files
    pub path: PathBuf,
}

impl CheckpointHandle {
    pub fn new(storage_id: StorageId, path: impl Into<PathBuf>) -> Self {
        Self {
            storage_id,
            path: path.into(),
        }
    }

    /// Directory holding the checkpoint files
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lifecycle of a single checkpoint as seen by the storage manager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    /// Allocated and being written
    Writing,

    /// Write finished and made durable
    Committed,

    /// Location removed
    Deleted,
}

/// Checkpoint record as returned by the experiment tracking service
///
/// Only `uuid` drives storage operations. Every other field is kept as raw
/// JSON and never validated, so an unexpected shape (string-encoded sizes,
/// `null` maps, arbitrary timestamp formats) does not reject the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Storage identifier of the checkpoint
    pub uuid: StorageId,

    /// Reported checkpoint state (e.g. "COMPLETED", "DELETED")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,

    /// Batch number at which the checkpoint was reported
    #[serde(default, alias = "batchNumber", skip_serializing_if = "Option::is_none")]
    pub batch_number: Option<serde_json::Value>,

    /// Report time
    #[serde(default, alias = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<serde_json::Value>,

    /// Validation metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<serde_json::Value>,

    /// Free-form user metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// File names and sizes within the checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
}

/// A batch of checkpoint records designated for deletion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointDeletion {
    #[serde(default)]
    pub checkpoints: Vec<CheckpointRecord>,
}

impl CheckpointDeletion {
    /// Storage ids of all records, in input order
    pub fn storage_ids(&self) -> Vec<StorageId> {
        self.checkpoints.iter().map(|c| c.uuid.clone()).collect()
    }
}

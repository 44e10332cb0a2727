//! Local / shared filesystem storage backend
//!
//! Lays checkpoints out as one directory per storage id directly under the
//! base path. Works the same for a local disk and a network mount shared
//! between trainers and the garbage collector.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use runtime_core::{CheckpointHandle, Error, Result, StorageId};
use tokio::fs;
use tracing::{debug, instrument};

use crate::StorageBackend;

/// Filesystem storage backend
///
/// Stores checkpoints in a base directory with support for:
/// - Collision-safe allocation (non-recursive `create_dir` of a fresh UUID)
/// - Idempotent recursive deletion
/// - Listing of checkpoint directories
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Base path for all storage operations
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// The directory is created lazily on first allocation.
    ///
    /// # Arguments
    /// * `base_path` - Directory to use as the storage root
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory of a checkpoint
    pub fn checkpoint_path(&self, id: &StorageId) -> PathBuf {
        self.base_path.join(id.as_str())
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn kind(&self) -> &'static str {
        "shared_fs"
    }

    #[instrument(skip(self), fields(backend = "shared_fs"))]
    async fn allocate(&self) -> Result<CheckpointHandle> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| Error::Allocation {
                message: format!(
                    "Failed to create base directory {:?}: {}",
                    self.base_path, e
                ),
            })?;

        let storage_id = StorageId::generate();
        let path = self.checkpoint_path(&storage_id);

        // Non-recursive on purpose: an existing directory means a collision
        fs::create_dir(&path).await.map_err(|e| Error::Allocation {
            message: format!("Failed to create checkpoint directory {:?}: {}", path, e),
        })?;

        debug!(%storage_id, ?path, "Allocated checkpoint directory");
        Ok(CheckpointHandle::new(storage_id, path))
    }

    #[instrument(skip(self, handle), fields(backend = "shared_fs", storage_id = %handle.storage_id))]
    async fn commit(&self, handle: &CheckpointHandle) -> Result<()> {
        // Files were written in place; only make sure the directory survived
        match fs::metadata(&handle.path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::Commit {
                storage_id: handle.storage_id.to_string(),
                message: format!("{:?} is not a directory", handle.path),
            }),
            Err(e) => Err(Error::Commit {
                storage_id: handle.storage_id.to_string(),
                message: format!("Checkpoint directory {:?} unavailable: {}", handle.path, e),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "shared_fs"))]
    async fn delete(&self, id: &StorageId) -> Result<()> {
        let full_path = self.checkpoint_path(id);
        debug!(?full_path, "Deleting checkpoint directory");

        let meta = match fs::symlink_metadata(&full_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(?full_path, "Checkpoint already absent");
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Deletion {
                    storage_id: id.to_string(),
                    message: format!("Failed to stat {:?}: {}", full_path, e),
                })
            }
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        };

        match result {
            Ok(()) => Ok(()),
            // Raced with another deleter
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Deletion {
                storage_id: id.to_string(),
                message: format!("Failed to delete {:?}: {}", full_path, e),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "shared_fs"))]
    async fn list(&self) -> Result<Vec<StorageId>> {
        let mut results = Vec::new();

        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(results),
            Err(e) => {
                return Err(Error::Storage {
                    message: format!("Failed to list {:?}: {}", self.base_path, e),
                })
            }
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Storage {
            message: format!("Failed to read entry in {:?}: {}", self.base_path, e),
        })? {
            let is_dir = match entry.file_type().await {
                Ok(file_type) => file_type.is_dir(),
                Err(_) => continue,
            };
            if !is_dir {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if let Ok(id) = StorageId::parse(name) {
                results.push(id);
            }
        }

        results.sort();
        debug!(count = results.len(), "Found checkpoints");
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "shared_fs"))]
    async fn restore(&self, id: &StorageId) -> Result<CheckpointHandle> {
        let path = self.checkpoint_path(id);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(CheckpointHandle::new(id.clone(), path)),
            Ok(_) => Err(Error::CheckpointNotFound {
                storage_id: id.to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::CheckpointNotFound {
                storage_id: id.to_string(),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to resolve {:?}: {}", path, e),
            }),
        }
    }
}

//! Checkpoint storage manager
//!
//! Mediates every backend access through scoped acquisition: a checkpoint
//! is allocated, written by the caller, then either committed or deleted.
//! No exit path (error, panic, or a dropped future) leaves a half-written
//! checkpoint behind.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use runtime_core::{
    CheckpointHandle, CheckpointState, Error, Result, RetryConfig, StorageConfig, StorageId,
};
use storage::{LocalStorage, StorageBackendHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

/// Checkpoint storage manager
///
/// Holds an immutable backend (and its root) for its whole lifetime; all
/// per-checkpoint state is discoverable by listing the backend.
#[derive(Clone)]
pub struct CheckpointStorageManager {
    /// Backend doing the actual I/O
    backend: StorageBackendHandle,

    /// Root directory, when the backend is filesystem based
    base_path: Option<PathBuf>,
}

impl std::fmt::Debug for CheckpointStorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStorageManager")
            .field("backend", &self.backend.kind())
            .field("base_path", &self.base_path)
            .finish()
    }
}

impl CheckpointStorageManager {
    /// Create a manager over an arbitrary backend
    pub fn new(backend: StorageBackendHandle) -> Self {
        Self {
            backend,
            base_path: None,
        }
    }

    /// Create a manager over a shared filesystem rooted at `base_path`
    pub fn shared_fs(base_path: impl AsRef<Path>) -> Self {
        let base_path = base_path.as_ref().to_path_buf();
        Self {
            backend: Arc::new(LocalStorage::new(&base_path)),
            base_path: Some(base_path),
        }
    }

    /// Create a manager for the backend selected by `config`
    pub async fn from_config(config: &StorageConfig, retry: &RetryConfig) -> Result<Self> {
        let backend = storage::build(config, retry).await?;
        Ok(Self {
            backend,
            base_path: config.shared_fs_base_path(),
        })
    }

    /// Root directory of a filesystem backend, for diagnostics
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// Name of the underlying backend
    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Allocate a new checkpoint location
    ///
    /// The returned guard deletes the location when dropped unless
    /// [`PendingCheckpoint::commit`] succeeded.
    ///
    /// Allocation runs in its own task and hands back an already armed
    /// guard, so dropping this future mid-allocation still cleans up.
    #[instrument(skip(self), fields(backend = self.backend.kind()))]
    pub async fn begin(&self) -> Result<PendingCheckpoint> {
        let (tx, rx) = oneshot::channel();
        let backend = Arc::clone(&self.backend);

        tokio::spawn(async move {
            let allocated = backend.allocate().await.map(|handle| PendingCheckpoint {
                backend,
                handle,
                state: CheckpointState::Writing,
            });
            // A closed receiver drops the guard, which schedules deletion
            let _ = tx.send(allocated);
        });

        let pending = rx.await.map_err(|_| Error::Allocation {
            message: "allocation task ended without a result".to_string(),
        })??;
        debug!(
            storage_id = %pending.handle.storage_id,
            path = ?pending.handle.path,
            "Checkpoint allocated"
        );
        Ok(pending)
    }

    /// Allocate a checkpoint, run `write` against it, then commit
    ///
    /// `write` receives the handle of the freshly allocated location. When it
    /// returns `Ok` the checkpoint is committed and its id returned along
    /// with the value `write` produced. When it returns `Err` the location is
    /// deleted first and the caller's error is returned unchanged. If the
    /// returned future is dropped before completion the location is deleted
    /// in the background.
    pub async fn store_path<F, Fut, T, E>(&self, write: F) -> std::result::Result<(StorageId, T), E>
    where
        F: FnOnce(CheckpointHandle) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let pending = self.begin().await?;

        match write(pending.handle().clone()).await {
            Ok(value) => {
                let storage_id = pending.commit().await?;
                Ok((storage_id, value))
            }
            Err(err) => {
                let storage_id = pending.storage_id().clone();
                warn!(%storage_id, "Checkpoint write failed, removing partial checkpoint");
                if let Err(cleanup) = pending.abort().await {
                    error!(%storage_id, error = %cleanup, "Failed to remove partial checkpoint");
                }
                Err(err)
            }
        }
    }

    /// Delete a checkpoint; deleting an absent checkpoint succeeds
    #[instrument(skip(self, id), fields(backend = self.backend.kind(), storage_id = %id))]
    pub async fn delete(&self, id: &StorageId) -> Result<()> {
        self.backend.delete(id).await?;
        debug!("Checkpoint deleted");
        Ok(())
    }

    /// Ids of all checkpoints currently present
    pub async fn list(&self) -> Result<Vec<StorageId>> {
        self.backend.list().await
    }

    /// Resolve a checkpoint to a local readable directory
    #[instrument(skip(self, id), fields(backend = self.backend.kind(), storage_id = %id))]
    pub async fn restore_path(&self, id: &StorageId) -> Result<CheckpointHandle> {
        self.backend.restore(id).await
    }
}

/// An allocated checkpoint that has not been committed yet
///
/// Dropping it in the `Writing` state schedules deletion of the location on
/// the current tokio runtime.
pub struct PendingCheckpoint {
    backend: StorageBackendHandle,
    handle: CheckpointHandle,
    state: CheckpointState,
}

impl std::fmt::Debug for PendingCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCheckpoint")
            .field("backend", &self.backend.kind())
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish()
    }
}

impl PendingCheckpoint {
    pub fn storage_id(&self) -> &StorageId {
        &self.handle.storage_id
    }

    /// Directory to write checkpoint files into
    pub fn path(&self) -> &Path {
        &self.handle.path
    }

    pub fn handle(&self) -> &CheckpointHandle {
        &self.handle
    }

    pub fn state(&self) -> CheckpointState {
        self.state
    }

    /// Make the checkpoint durable
    ///
    /// On failure the location is deleted and the commit error returned.
    pub async fn commit(mut self) -> Result<StorageId> {
        match self.backend.commit(&self.handle).await {
            Ok(()) => {
                self.state = CheckpointState::Committed;
                info!(
                    storage_id = %self.handle.storage_id,
                    backend = self.backend.kind(),
                    "Checkpoint committed"
                );
                Ok(self.handle.storage_id.clone())
            }
            Err(e) => {
                error!(storage_id = %self.handle.storage_id, error = %e, "Checkpoint commit failed");
                if let Err(cleanup) = self.discard().await {
                    error!(
                        storage_id = %self.handle.storage_id,
                        error = %cleanup,
                        "Failed to remove uncommitted checkpoint"
                    );
                }
                Err(e)
            }
        }
    }

    /// Delete the allocated location without committing
    pub async fn abort(mut self) -> Result<()> {
        self.discard().await
    }

    async fn discard(&mut self) -> Result<()> {
        self.backend.delete(&self.handle.storage_id).await?;
        self.state = CheckpointState::Deleted;
        debug!(storage_id = %self.handle.storage_id, "Uncommitted checkpoint removed");
        Ok(())
    }
}

impl Drop for PendingCheckpoint {
    fn drop(&mut self) {
        if self.state != CheckpointState::Writing {
            return;
        }

        let storage_id = self.handle.storage_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(%storage_id, "Checkpoint abandoned before commit, scheduling cleanup");
                let backend = Arc::clone(&self.backend);
                runtime.spawn(async move {
                    match backend.delete(&storage_id).await {
                        Ok(()) => debug!(%storage_id, "Abandoned checkpoint removed"),
                        Err(e) => {
                            error!(%storage_id, error = %e, "Failed to remove abandoned checkpoint")
                        }
                    }
                });
            }
            Err(_) => {
                error!(
                    %storage_id,
                    path = ?self.handle.path,
                    "Checkpoint abandoned outside a tokio runtime, location left behind"
                );
            }
        }
    }
}

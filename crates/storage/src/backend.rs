//! Storage backend trait definition
//!
//! Defines the async interface that all checkpoint storage backends must
//! implement.

use async_trait::async_trait;
use runtime_core::{CheckpointHandle, Result, StorageId};

/// Async trait for checkpoint storage backends
///
/// A backend owns one root (a directory, or a bucket and prefix) and keeps
/// exactly one location per [`StorageId`] directly under it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name used in logs
    fn kind(&self) -> &'static str;

    /// Allocate a fresh storage id and create its writable directory
    ///
    /// # Errors
    /// Returns `Error::Allocation` if the location cannot be created
    /// (disk full, permission denied, backend unavailable)
    async fn allocate(&self) -> Result<CheckpointHandle>;

    /// Make a completed write durable
    ///
    /// Called once after the caller finished writing into `handle.path`.
    ///
    /// # Errors
    /// Returns `Error::Commit` if the data cannot be persisted
    async fn commit(&self, handle: &CheckpointHandle) -> Result<()>;

    /// Remove everything stored under `id`
    ///
    /// Deleting an id that is not present succeeds.
    ///
    /// # Errors
    /// Returns `Error::Deletion` only on genuine I/O failure
    async fn delete(&self, id: &StorageId) -> Result<()>;

    /// List the ids currently present under the root, sorted
    async fn list(&self) -> Result<Vec<StorageId>>;

    /// Resolve `id` to a local directory the caller can read from
    ///
    /// # Errors
    /// Returns `Error::CheckpointNotFound` if `id` is not present
    async fn restore(&self, id: &StorageId) -> Result<CheckpointHandle>;
}

use anyhow::Result;
use async_trait::async_trait;
use checkpoint::{delete_checkpoints, CheckpointStorageManager, GcOutcome};
use parking_lot::Mutex;
use runtime_core::{CheckpointHandle, Error, StorageId};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storage::{LocalStorage, StorageBackend};
use tempfile::TempDir;

// Write a small multi-file checkpoint into `dir`
async fn create_checkpoint(dir: &Path) -> runtime_core::Result<()> {
    tokio::fs::create_dir_all(dir.join("optimizer")).await?;
    tokio::fs::write(dir.join("model.bin"), vec![1u8; 128]).await?;
    tokio::fs::write(dir.join("optimizer/state.bin"), vec![2u8; 64]).await?;
    tokio::fs::write(dir.join("metadata.json"), br#"{"step": 100}"#).await?;
    Ok(())
}

async fn store_checkpoints(manager: &CheckpointStorageManager, count: usize) -> Result<Vec<StorageId>> {
    let mut ids = Vec::new();
    for _ in 0..count {
        let (id, ()) = manager
            .store_path(|handle| async move { create_checkpoint(handle.path()).await })
            .await?;
        ids.push(id);
    }
    Ok(ids)
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Shared-filesystem backend that fails deletions of chosen ids and records
/// the order deletions were requested in
struct FlakyBackend {
    inner: LocalStorage,
    failing: HashSet<StorageId>,
    deleted: Mutex<Vec<StorageId>>,
}

impl FlakyBackend {
    fn new(base: &Path, failing: HashSet<StorageId>) -> Self {
        Self {
            inner: LocalStorage::new(base),
            failing,
            deleted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn allocate(&self) -> runtime_core::Result<CheckpointHandle> {
        self.inner.allocate().await
    }

    async fn commit(&self, handle: &CheckpointHandle) -> runtime_core::Result<()> {
        self.inner.commit(handle).await
    }

    async fn delete(&self, id: &StorageId) -> runtime_core::Result<()> {
        self.deleted.lock().push(id.clone());
        if self.failing.contains(id) {
            return Err(Error::Deletion {
                storage_id: id.to_string(),
                message: "simulated I/O error".to_string(),
            });
        }
        self.inner.delete(id).await
    }

    async fn list(&self) -> runtime_core::Result<Vec<StorageId>> {
        self.inner.list().await
    }

    async fn restore(&self, id: &StorageId) -> runtime_core::Result<CheckpointHandle> {
        self.inner.restore(id).await
    }
}

#[tokio::test]
async fn test_store_count_matches_listing() -> Result<()> {
    for count in [0, 1, 5] {
        let dir = TempDir::new()?;
        let manager = CheckpointStorageManager::shared_fs(dir.path());

        let ids = store_checkpoints(&manager, count).await?;
        assert_eq!(entries(dir.path()), count);

        let mut listed = manager.list().await?;
        let mut expected = ids.clone();
        listed.sort();
        expected.sort();
        assert_eq!(listed, expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_all_leaves_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let manager = CheckpointStorageManager::shared_fs(dir.path());
    let ids = store_checkpoints(&manager, 5).await?;

    let report = delete_checkpoints(&manager, &ids, false).await;

    assert_eq!(entries(dir.path()), 0);
    assert!(manager.list().await?.is_empty());
    assert_eq!(report.summary.deleted, 5);
    assert!(report.is_success());
    Ok(())
}

#[tokio::test]
async fn test_dry_run_leaves_everything() -> Result<()> {
    let dir = TempDir::new()?;
    let manager = CheckpointStorageManager::shared_fs(dir.path());
    let ids = store_checkpoints(&manager, 5).await?;
    let before = manager.list().await?;

    let report = delete_checkpoints(&manager, &ids, true).await;

    assert_eq!(entries(dir.path()), 5);
    assert_eq!(manager.list().await?, before);
    assert!(report.dry_run);
    assert!(report
        .entries
        .iter()
        .all(|e| e.outcome == GcOutcome::Skipped));
    Ok(())
}

#[tokio::test]
async fn test_double_delete_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let manager = CheckpointStorageManager::shared_fs(dir.path());
    let ids = store_checkpoints(&manager, 2).await?;

    manager.delete(&ids[0]).await?;
    manager.delete(&ids[0]).await?;

    let report = delete_checkpoints(&manager, &ids, false).await;
    assert!(report.is_success());
    assert_eq!(report.summary.deleted, 2);
    assert!(manager.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_write_leaves_no_orphan() -> Result<()> {
    let dir = TempDir::new()?;
    let manager = CheckpointStorageManager::shared_fs(dir.path());
    store_checkpoints(&manager, 2).await?;

    let result = manager
        .store_path(|handle| async move {
            create_checkpoint(handle.path()).await?;
            Err::<(), _>(anyhow::anyhow!("trainer lost its GPU mid-save"))
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "trainer lost its GPU mid-save");
    assert_eq!(entries(dir.path()), 2);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_write_leaves_no_orphan() -> Result<()> {
    let dir = TempDir::new()?;
    let manager = CheckpointStorageManager::shared_fs(dir.path());

    let write = manager.store_path(|handle| async move {
        create_checkpoint(handle.path()).await?;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<_, Error>(())
    });
    assert!(tokio::time::timeout(Duration::from_millis(100), write)
        .await
        .is_err());

    for _ in 0..200 {
        if entries(dir.path()) == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cancelled checkpoint still present: {:?}", manager.list().await?);
}

#[tokio::test]
async fn test_batch_continues_past_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let setup = CheckpointStorageManager::shared_fs(dir.path());
    let ids = store_checkpoints(&setup, 5).await?;
    let bad = ids[2].clone();

    let backend = Arc::new(FlakyBackend::new(dir.path(), HashSet::from([bad.clone()])));
    let manager = CheckpointStorageManager::new(backend.clone());

    let report = delete_checkpoints(&manager, &ids, false).await;

    // Every id was attempted, in the order given
    assert_eq!(*backend.deleted.lock(), ids);
    assert_eq!(report.summary.attempted, 5);
    assert_eq!(report.summary.deleted, 4);
    assert_eq!(report.summary.failed, 1);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, &bad);
    assert!(failures[0].1.contains("simulated I/O error"));

    assert_eq!(manager.list().await?, vec![bad]);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_does_not_touch_backend() -> Result<()> {
    let dir = TempDir::new()?;
    let backend = Arc::new(FlakyBackend::new(dir.path(), HashSet::new()));
    let manager = CheckpointStorageManager::new(backend.clone());
    let ids = store_checkpoints(&manager, 3).await?;

    let report = delete_checkpoints(&manager, &ids, true).await;

    assert!(backend.deleted.lock().is_empty());
    assert_eq!(report.summary.skipped, 3);
    assert_eq!(manager.list().await?.len(), 3);
    Ok(())
}

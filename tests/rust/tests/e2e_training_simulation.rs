//! End-to-end training simulation test
//!
//! This test simulates a realistic training run against shared checkpoint storage:
//! - Multiple workers saving checkpoints concurrently
//! - A worker crashing mid-save
//! - The experiment tracker deciding which checkpoints to keep
//! - The `ckpt-gc` runner deleting the rest

use anyhow::Result;
use checkpoint::CheckpointStorageManager;
use checkpoint_gc::cli::Cli;
use checkpoint_gc::runner::{self, EXIT_DELETION_FAILED, EXIT_SUCCESS};
use clap::Parser;
use runtime_core::{CheckpointRecord, StorageId};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tempfile::TempDir;

/// Simulates a training worker that checkpoints every few steps
struct SimulatedWorker {
    rank: usize,
    manager: CheckpointStorageManager,
}

impl SimulatedWorker {
    fn new(rank: usize, manager: CheckpointStorageManager) -> Self {
        Self { rank, manager }
    }

    async fn checkpoint(&self, step: u64) -> Result<StorageId> {
        let rank = self.rank;
        let (id, ()) = self
            .manager
            .store_path(|handle| async move {
                let dir = handle.path();
                tokio::fs::write(dir.join(format!("model_rank{}.bin", rank)), vec![0u8; 1024])
                    .await?;
                tokio::fs::write(
                    dir.join("metadata.json"),
                    json!({ "step": step, "rank": rank }).to_string(),
                )
                .await?;
                Ok::<_, anyhow::Error>(())
            })
            .await?;
        Ok(id)
    }
}

async fn run_cli(args: &[&str]) -> Result<(u8, String)> {
    let cli = Cli::try_parse_from(args)?;
    let mut out = Vec::new();
    let code = runner::run(cli, &mut out).await?;
    Ok((code, String::from_utf8(out)?))
}

fn write_deletion_file(path: &Path, ids: &[StorageId]) -> Result<()> {
    let records = json!({
        "checkpoints": ids.iter().enumerate().map(|(i, id)| json!({
            "uuid": id.as_str(),
            "state": "COMPLETED",
            "batchNumber": (i as u64 + 1) * 100,
            "endTime": "2024-05-01T12:00:00Z",
            "resources": { "model.bin": "1024" },
            "metadata": null,
        })).collect::<Vec<_>>()
    });
    std::fs::write(path, serde_json::to_vec_pretty(&records)?)?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_worker_training_simulation() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = TempDir::new()?;
    let store = dir.path().join("checkpoints");
    let manager = CheckpointStorageManager::shared_fs(&store);

    let world_size = 4;
    let steps = [100u64, 200, 300];
    let barrier = Arc::new(Barrier::new(world_size));

    let mut handles = Vec::new();
    for rank in 0..world_size {
        let worker = SimulatedWorker::new(rank, manager.clone());
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for step in steps {
                ids.push(worker.checkpoint(step).await?);
                barrier.wait().await;
            }
            Ok::<_, anyhow::Error>(ids)
        }));
    }

    let mut all_ids = Vec::new();
    let mut keep = Vec::new();
    let mut stale = Vec::new();
    for handle in handles {
        let mut ids = handle.await??;
        all_ids.extend(ids.iter().cloned());
        keep.extend(ids.pop());
        stale.extend(ids);
    }

    // Every save got its own location
    let unique: HashSet<_> = all_ids.iter().cloned().collect();
    assert_eq!(unique.len(), world_size * steps.len());
    assert_eq!(manager.list().await?.len(), world_size * steps.len());

    // The tracker keeps the newest step and garbage collects the rest
    let deletion_file = dir.path().join("delete.json");
    write_deletion_file(&deletion_file, &stale)?;

    let store_arg = store.to_str().unwrap();
    let deletion_arg = deletion_file.to_str().unwrap();

    let (code, out) = run_cli(&[
        "ckpt-gc", "delete", "--base-path", store_arg, "--delete", deletion_arg, "--dry-run",
    ])
    .await?;
    assert_eq!(code, EXIT_SUCCESS);
    let report: checkpoint::GcReport = serde_json::from_str(&out)?;
    assert!(report.dry_run);
    assert_eq!(report.summary.skipped, stale.len());
    assert_eq!(manager.list().await?.len(), all_ids.len());

    let (code, out) = run_cli(&[
        "ckpt-gc", "delete", "--base-path", store_arg, "--delete", deletion_arg,
    ])
    .await?;
    assert_eq!(code, EXIT_SUCCESS);
    let report: checkpoint::GcReport = serde_json::from_str(&out)?;
    assert_eq!(report.summary.deleted, stale.len());

    let mut remaining = manager.list().await?;
    let mut expected = keep.clone();
    remaining.sort();
    expected.sort();
    assert_eq!(remaining, expected);

    let (code, out) = run_cli(&["ckpt-gc", "list", "--base-path", store_arg]).await?;
    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(out.lines().count(), keep.len());

    // Running the same deletion again is harmless
    let (code, _) = run_cli(&[
        "ckpt-gc", "delete", "--base-path", store_arg, "--delete", deletion_arg,
    ])
    .await?;
    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(manager.list().await?.len(), keep.len());

    Ok(())
}

#[tokio::test]
async fn test_worker_crash_mid_save() -> Result<()> {
    let dir = TempDir::new()?;
    let manager = CheckpointStorageManager::shared_fs(dir.path());
    let survivor = SimulatedWorker::new(0, manager.clone()).checkpoint(100).await?;

    let crashing = manager.clone();
    let task = tokio::spawn(async move {
        crashing
            .store_path(|handle| async move {
                tokio::fs::write(handle.path().join("model_rank1.bin"), vec![0u8; 512]).await?;
                let crashed = true;
                if crashed {
                    panic!("worker 1 segfaulted while saving");
                }
                Ok::<_, runtime_core::Error>(())
            })
            .await
    });
    assert!(task.await.unwrap_err().is_panic());

    for _ in 0..200 {
        if manager.list().await? == vec![survivor.clone()] {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("crashed save left a checkpoint behind: {:?}", manager.list().await?);
}

#[tokio::test]
async fn test_restore_after_gc() -> Result<()> {
    let dir = TempDir::new()?;
    let manager = CheckpointStorageManager::shared_fs(dir.path());
    let worker = SimulatedWorker::new(0, manager.clone());
    let old = worker.checkpoint(100).await?;
    let new = worker.checkpoint(200).await?;

    let report = checkpoint::delete_checkpoints(&manager, &[old.clone()], false).await;
    assert!(report.is_success());

    let handle = manager.restore_path(&new).await?;
    let metadata: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(handle.path().join("metadata.json")).await?)?;
    assert_eq!(metadata["step"], 200);

    assert!(manager.restore_path(&old).await.is_err());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_gc_reports_partial_failure() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new()?;

    // Root ignores directory permissions
    let check = dir.path().join("permission-check");
    std::fs::create_dir(&check)?;
    std::fs::set_permissions(&check, std::fs::Permissions::from_mode(0o500))?;
    let bypassed = std::fs::write(check.join("x"), b"x").is_ok();
    std::fs::set_permissions(&check, std::fs::Permissions::from_mode(0o700))?;
    std::fs::remove_dir_all(&check)?;
    if bypassed {
        return Ok(());
    }

    let manager = CheckpointStorageManager::shared_fs(dir.path());
    let worker = SimulatedWorker::new(0, manager.clone());
    let ids = vec![worker.checkpoint(100).await?, worker.checkpoint(200).await?];

    let locked = dir.path().join(ids[0].as_str());
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500))?;

    let (code, out) = run_cli(&[
        "ckpt-gc",
        "delete",
        "--base-path",
        dir.path().to_str().unwrap(),
        "--format",
        "text",
        ids[0].as_str(),
        ids[1].as_str(),
    ])
    .await?;

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700))?;

    assert_eq!(code, EXIT_DELETION_FAILED);
    assert!(out.contains("failed"));
    assert_eq!(manager.list().await?, vec![ids[0].clone()]);
    Ok(())
}

#[test]
fn test_tracker_records_parse() -> Result<()> {
    let record: CheckpointRecord = serde_json::from_value(json!({
        "uuid": "7e0b6f2a-checkpoint",
        "state": "deleted",
        "batchNumber": 400,
    }))?;
    assert_eq!(record.uuid.as_str(), "7e0b6f2a-checkpoint");
    assert_eq!(record.state, Some(json!("deleted")));
    assert_eq!(record.batch_number, Some(json!(400)));
    Ok(())
}

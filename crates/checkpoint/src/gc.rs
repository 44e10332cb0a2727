//! Checkpoint garbage collection
//!
//! Deletes an externally chosen set of checkpoints through a
//! [`CheckpointStorageManager`]. Deletion is best effort across the batch:
//! a failure on one checkpoint is recorded and the rest are still attempted.

use runtime_core::{Error, Result, StorageId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::manager::CheckpointStorageManager;

/// What happened to one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GcOutcome {
    /// Removed (or already absent)
    Deleted,

    /// Backend deletion failed
    Failed { reason: String },

    /// Dry run, storage untouched
    Skipped,
}

/// Per-checkpoint entry of a [`GcReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcEntry {
    pub storage_id: StorageId,

    #[serde(flatten)]
    pub outcome: GcOutcome,
}

/// Batch totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcSummary {
    /// Identifiers handed to the collector
    pub requested: usize,

    /// Deletions actually issued against the backend
    pub attempted: usize,

    pub deleted: usize,

    pub failed: usize,

    /// Identifiers reported by a dry run
    pub skipped: usize,
}

/// Result of a garbage collection batch, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    pub dry_run: bool,
    pub summary: GcSummary,
    pub entries: Vec<GcEntry>,
}

impl GcReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    /// Append the outcome for one checkpoint
    pub fn record(&mut self, storage_id: StorageId, outcome: GcOutcome) {
        self.summary.requested += 1;
        match &outcome {
            GcOutcome::Deleted => {
                self.summary.attempted += 1;
                self.summary.deleted += 1;
            }
            GcOutcome::Failed { .. } => {
                self.summary.attempted += 1;
                self.summary.failed += 1;
            }
            GcOutcome::Skipped => self.summary.skipped += 1,
        }
        self.entries.push(GcEntry {
            storage_id,
            outcome,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no deletion failed
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }

    /// Failed checkpoints with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&StorageId, &str)> {
        self.entries.iter().filter_map(|entry| match &entry.outcome {
            GcOutcome::Failed { reason } => Some((&entry.storage_id, reason.as_str())),
            _ => None,
        })
    }

    /// Convert into an error when any deletion failed
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::GcFailed {
                failed: self.summary.failed,
                total: self.summary.requested,
            })
        }
    }
}

/// Delete `ids` through `manager`, or only report them when `dry_run` is set
///
/// Identifiers are processed sequentially in the given order. Absent
/// checkpoints count as deleted. A dry run never calls the backend and
/// does not check whether the checkpoints exist.
pub async fn delete_checkpoints(
    manager: &CheckpointStorageManager,
    ids: &[StorageId],
    dry_run: bool,
) -> GcReport {
    let mut report = GcReport::new(dry_run);

    for storage_id in ids {
        if dry_run {
            info!(%storage_id, "Dry run: would delete checkpoint");
            report.record(storage_id.clone(), GcOutcome::Skipped);
            continue;
        }

        info!(%storage_id, "Deleting checkpoint");
        match manager.delete(storage_id).await {
            Ok(()) => report.record(storage_id.clone(), GcOutcome::Deleted),
            Err(e) => {
                warn!(%storage_id, error = %e, "Failed to delete checkpoint");
                report.record(
                    storage_id.clone(),
                    GcOutcome::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    let summary = report.summary;
    info!(
        dry_run,
        requested = summary.requested,
        deleted = summary.deleted,
        failed = summary.failed,
        skipped = summary.skipped,
        backend = manager.backend_kind(),
        "Checkpoint garbage collection finished"
    );

    report
}

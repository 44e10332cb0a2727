//! Checkpoint storage management for training jobs
//!
//! Provides scoped checkpoint allocation, identifier-based deletion, and
//! batch garbage collection with dry-run support.

pub mod gc;
pub mod manager;

pub use gc::{delete_checkpoints, GcEntry, GcOutcome, GcReport, GcSummary};
pub use manager::{CheckpointStorageManager, PendingCheckpoint};

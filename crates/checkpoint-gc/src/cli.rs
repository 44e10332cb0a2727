//! Command line arguments

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ckpt-gc", about = "Manage and garbage collect training checkpoints")]
pub struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", value_name = "LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Delete checkpoints by storage id
    Delete(DeleteArgs),
    /// List checkpoints present in storage
    List(StorageArgs),
    /// Print the local readable path of a checkpoint
    Restore(RestoreArgs),
}

/// Where the checkpoints live; exactly one source is required
#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    /// Shared filesystem directory holding one directory per checkpoint
    #[arg(long, value_name = "DIR", conflicts_with_all = ["config", "experiment_config"])]
    pub base_path: Option<PathBuf>,

    /// GC configuration (JSON with `storage`, optional `retry` and `dry_run`)
    #[arg(long, value_name = "FILE", conflicts_with = "experiment_config")]
    pub config: Option<PathBuf>,

    /// Experiment configuration (JSON with a `checkpoint_storage` section)
    #[arg(long, value_name = "FILE")]
    pub experiment_config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Storage ids to delete
    #[arg(value_name = "STORAGE_ID")]
    pub ids: Vec<String>,

    /// Checkpoints to delete (JSON file: {"checkpoints": [{"uuid": ...}, ...]})
    #[arg(long = "delete", value_name = "FILE")]
    pub delete_file: Option<PathBuf>,

    /// Report what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Storage id of the checkpoint
    #[arg(value_name = "STORAGE_ID")]
    pub id: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

//! Command execution: storage selection, id collection and report output

use std::io::Write;

use anyhow::{bail, Context, Result};
use checkpoint::{delete_checkpoints, CheckpointStorageManager, GcOutcome, GcReport};
use runtime_core::config::load_json;
use runtime_core::{CheckpointDeletion, GcConfig, StorageConfig, StorageId};
use serde::Deserialize;
use tracing::info;

use crate::cli::{Cli, Commands, DeleteArgs, OutputFormat, RestoreArgs, StorageArgs};

/// Every requested deletion succeeded (or was a dry run)
pub const EXIT_SUCCESS: u8 = 0;

/// At least one deletion failed, or a storage operation failed after the
/// configuration was accepted
pub const EXIT_DELETION_FAILED: u8 = 1;

/// Bad arguments or configuration, nothing was deleted
pub const EXIT_USAGE: u8 = 2;

/// Why a command stopped early
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Arguments or configuration rejected before any checkpoint was touched
    #[error("{0:#}")]
    Usage(anyhow::Error),

    /// Storage or output failed after the command started
    #[error("{0:#}")]
    Operation(anyhow::Error),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Usage(_) => EXIT_USAGE,
            RunError::Operation(_) => EXIT_DELETION_FAILED,
        }
    }
}

/// The part of an experiment configuration the collector needs
#[derive(Debug, Deserialize)]
struct ExperimentConfig {
    checkpoint_storage: StorageConfig,
}

/// Resolve the configured storage source into a GC configuration
pub fn resolve_config(args: &StorageArgs) -> Result<GcConfig> {
    if let Some(base_path) = &args.base_path {
        return Ok(GcConfig {
            storage: StorageConfig::shared_fs(base_path),
            ..Default::default()
        });
    }

    if let Some(path) = &args.config {
        return load_json::<GcConfig>(path).context("loading GC configuration");
    }

    if let Some(path) = &args.experiment_config {
        let experiment: ExperimentConfig =
            load_json(path).context("loading experiment configuration")?;
        return Ok(GcConfig {
            storage: experiment.checkpoint_storage,
            ..Default::default()
        });
    }

    bail!("no checkpoint storage given: use --base-path, --config or --experiment-config")
}

/// Positional ids followed by the ids of the `--delete` file, in order
pub fn collect_ids(args: &DeleteArgs) -> Result<Vec<StorageId>> {
    let mut ids = args
        .ids
        .iter()
        .map(|raw| StorageId::parse(raw.as_str()))
        .collect::<runtime_core::Result<Vec<_>>>()
        .context("invalid storage id argument")?;

    if let Some(path) = &args.delete_file {
        let deletion: CheckpointDeletion =
            load_json(path).context("loading checkpoints to delete")?;
        ids.extend(deletion.storage_ids());
    }

    Ok(ids)
}

async fn open_manager(config: &GcConfig) -> Result<CheckpointStorageManager> {
    CheckpointStorageManager::from_config(&config.storage, &config.retry)
        .await
        .context("opening checkpoint storage")
}

/// Run a parsed command, writing its output to `out`
///
/// Returns the process exit code. [`RunError::Usage`] means nothing was
/// touched; [`RunError::Operation`] means storage or output failed midway.
pub async fn run(cli: Cli, out: &mut dyn Write) -> Result<u8, RunError> {
    match cli.command {
        Commands::Delete(args) => run_delete(&args, out).await,
        Commands::List(args) => run_list(&args, out).await,
        Commands::Restore(args) => run_restore(&args, out).await,
    }
}

async fn run_delete(args: &DeleteArgs, out: &mut dyn Write) -> Result<u8, RunError> {
    let config = resolve_config(&args.storage).map_err(RunError::Usage)?;
    let ids = collect_ids(args).map_err(RunError::Usage)?;
    let dry_run = args.dry_run || config.dry_run;
    let manager = open_manager(&config).await.map_err(RunError::Usage)?;

    info!(
        count = ids.len(),
        dry_run,
        backend = manager.backend_kind(),
        "Starting checkpoint garbage collection"
    );
    let report = delete_checkpoints(&manager, &ids, dry_run).await;
    let code = if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_DELETION_FAILED
    };

    render_report(&report, args.format, out)
        .context("writing GC report")
        .map_err(RunError::Operation)?;
    Ok(code)
}

async fn run_list(args: &StorageArgs, out: &mut dyn Write) -> Result<u8, RunError> {
    let config = resolve_config(args).map_err(RunError::Usage)?;
    let manager = open_manager(&config).await.map_err(RunError::Usage)?;

    let ids = manager
        .list()
        .await
        .context("listing checkpoints")
        .map_err(RunError::Operation)?;
    for id in ids {
        writeln!(out, "{}", id)
            .context("writing checkpoint list")
            .map_err(RunError::Operation)?;
    }
    Ok(EXIT_SUCCESS)
}

async fn run_restore(args: &RestoreArgs, out: &mut dyn Write) -> Result<u8, RunError> {
    let config = resolve_config(&args.storage).map_err(RunError::Usage)?;
    let id = StorageId::parse(args.id.as_str())
        .context("invalid storage id argument")
        .map_err(RunError::Usage)?;
    let manager = open_manager(&config).await.map_err(RunError::Usage)?;

    let handle = manager
        .restore_path(&id)
        .await
        .with_context(|| format!("resolving checkpoint {}", id))
        .map_err(RunError::Operation)?;
    writeln!(out, "{}", handle.path().display())
        .context("writing restore path")
        .map_err(RunError::Operation)?;
    Ok(EXIT_SUCCESS)
}

/// Write a GC report as pretty JSON or as a text table
pub fn render_report(report: &GcReport, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, report)?;
            writeln!(out)?;
        }
        OutputFormat::Text => render_text(report, out)?,
    }
    Ok(())
}

fn render_text(report: &GcReport, out: &mut dyn Write) -> std::io::Result<()> {
    let width = report
        .entries
        .iter()
        .map(|e| e.storage_id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("STORAGE ID".len());

    writeln!(out, "{:<width$}  OUTCOME", "STORAGE ID")?;
    for entry in &report.entries {
        let id = entry.storage_id.as_str();
        match &entry.outcome {
            GcOutcome::Deleted => writeln!(out, "{:<width$}  deleted", id)?,
            GcOutcome::Skipped => writeln!(out, "{:<width$}  would delete", id)?,
            GcOutcome::Failed { reason } => writeln!(out, "{:<width$}  failed: {}", id, reason)?,
        }
    }

    let s = report.summary;
    writeln!(
        out,
        "\n{}requested {}, deleted {}, failed {}, skipped {}",
        if report.dry_run { "[dry run] " } else { "" },
        s.requested,
        s.deleted,
        s.failed,
        s.skipped
    )
}

/// Default `EnvFilter` directive for a log level
pub fn default_log_filter(level: &str) -> String {
    ["checkpoint_gc", "checkpoint", "storage", "runtime_core"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

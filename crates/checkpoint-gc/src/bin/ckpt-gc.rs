//! Checkpoint garbage collector entry point
//!
//! Deletes, lists or restores training checkpoints in the configured storage.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkpoint_gc::{runner, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout only carries the report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| runner::default_log_filter(&cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut stdout = std::io::stdout();
    match runner::run(cli, &mut stdout).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "Checkpoint GC aborted");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

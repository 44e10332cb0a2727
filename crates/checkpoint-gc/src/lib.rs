//! Checkpoint garbage collection runner
//!
//! Library side of the `ckpt-gc` binary:
//! - **Storage selection**: a shared filesystem path, a GC config file, or an
//!   experiment configuration's `checkpoint_storage` section
//! - **Deletion input**: storage ids on the command line and/or a JSON file of
//!   checkpoint records from the experiment tracking service
//! - **Reporting**: JSON or text GC reports and the process exit code
//!
//! # Example
//!
//! ```no_run
//! use checkpoint_gc::{cli::Cli, runner};
//! use clap::Parser;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cli = Cli::parse_from(["ckpt-gc", "delete", "--base-path", "/mnt/ckpt", "--dry-run", "6f1c"]);
//! let code = runner::run(cli, &mut std::io::stdout()).await?;
//! assert_eq!(code, runner::EXIT_SUCCESS);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod runner;

pub use cli::{Cli, Commands, OutputFormat};
pub use runner::{run, RunError, EXIT_DELETION_FAILED, EXIT_SUCCESS, EXIT_USAGE};

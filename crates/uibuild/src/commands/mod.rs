//! Command dispatch.

mod build;
mod cache;
mod serve;

use crate::cli::{Cli, CliError, Command};
use clap::Parser;

/// Parse the command line and run the selected command.
pub async fn dispatch() -> Result<(), CliError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Build {
            cache_mode,
            watch,
            project,
        } => build::run(&cli.config, cache_mode.into(), watch, project).await,
        Command::Serve => serve::run(&cli.config).await,
        Command::Cache { command } => cache::run(command).await,
    }
}

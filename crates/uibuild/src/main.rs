//! uibuild CLI - multi-project UI build tool with an incremental cache.
//!
//! This binary wires the workspace descriptor, the builder, the build
//! server and the watcher into the `build`, `serve` and `cache`
//! commands.

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod commands;
mod workspace;

use crate::cli::{exit_code_for, render_error, EXIT_OK};
use tracing_subscriber::EnvFilter;

/// Exit code for SIGINT (128 + signal number 2)
const EXIT_SIGINT: i32 = 130;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let exit_code = run().await;
    std::process::exit(exit_code);
}

/// Run the CLI, mapping errors and interrupts to exit codes.
async fn run() -> i32 {
    tokio::select! {
        biased;

        _ = tokio::signal::ctrl_c() => EXIT_SIGINT,
        result = commands::dispatch() => {
            match result {
                Ok(()) => EXIT_OK,
                Err(err) => {
                    let code = exit_code_for(&err);
                    render_error(err);
                    code
                }
            }
        }
    }
}

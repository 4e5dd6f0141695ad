//! Command-line definition and error-to-exit-code mapping.

use clap::{Parser, Subcommand, ValueEnum};
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;
use uibuild_core::CacheMode;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Build failure exit code
pub const EXIT_BUILD: i32 = 3;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("Configuration error: {message}")]
    #[diagnostic(code(uibuild::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Build or cache failure (exit code 3)
    #[error("Build error: {message}")]
    #[diagnostic(code(uibuild::cli::build))]
    Build {
        message: String,
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    #[must_use]
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
            help: None,
        }
    }
}

impl From<uibuild_build::Error> for CliError {
    fn from(e: uibuild_build::Error) -> Self {
        match e {
            uibuild_build::Error::Configuration(message) => CliError::Config {
                message,
                help: None,
            },
            other => CliError::build(other.to_string()),
        }
    }
}

impl From<uibuild_server::Error> for CliError {
    fn from(e: uibuild_server::Error) -> Self {
        CliError::build(e.to_string())
    }
}

impl From<uibuild_cas::Error> for CliError {
    fn from(e: uibuild_cas::Error) -> Self {
        CliError::build(e.to_string())
    }
}

impl From<uibuild_core::Error> for CliError {
    fn from(e: uibuild_core::Error) -> Self {
        CliError::config(e.to_string())
    }
}

#[must_use]
pub fn exit_code_for(error: &CliError) -> i32 {
    match error {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Build { .. } => EXIT_BUILD,
    }
}

pub fn render_error(error: CliError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}

/// Cache modes accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CacheModeArg {
    #[default]
    Default,
    Force,
    Readonly,
    Off,
}

impl From<CacheModeArg> for CacheMode {
    fn from(arg: CacheModeArg) -> Self {
        match arg {
            CacheModeArg::Default => CacheMode::Default,
            CacheModeArg::Force => CacheMode::Force,
            CacheModeArg::Readonly => CacheMode::Readonly,
            CacheModeArg::Off => CacheMode::Off,
        }
    }
}

/// uibuild - multi-project UI build tool with an incremental cache.
#[derive(Debug, Parser)]
#[command(name = "uibuild", version, about)]
pub struct Cli {
    /// Path to the workspace descriptor.
    #[arg(long, global = true, default_value = "uibuild.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the workspace.
    Build {
        /// How the persistent cache is consulted.
        #[arg(long, value_enum, default_value_t = CacheModeArg::Default)]
        cache_mode: CacheModeArg,

        /// Keep watching sources and rebuild on change.
        #[arg(long)]
        watch: bool,

        /// Only build these projects (plus their dependencies).
        #[arg(long)]
        project: Vec<String>,
    },
    /// Start the lazy build server with watching enabled.
    Serve,
    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Remove everything below the cache root.
    Clean,
    /// Re-hash every stored blob and report corruption.
    Verify,
}

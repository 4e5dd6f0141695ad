//! The `serve` command: lazy build server with watching.
//!
//! Serving build output over HTTP is the host's concern; this command
//! keeps the server and watcher alive so readers observe fresh builds.

use crate::cli::CliError;
use crate::workspace;
use std::path::Path;
use std::sync::Arc;
use uibuild_build::{standard_registry, BuildRequest, Builder};
use uibuild_cas::BlobStore;
use uibuild_core::BuildConfiguration;

pub async fn run(config: &Path) -> Result<(), CliError> {
    let workspace = workspace::load(config)?;
    let store = Arc::new(BlobStore::open_default()?);
    // serve implies watch + read-write cache
    let configuration = BuildConfiguration {
        include_dependencies: true,
        ..Default::default()
    };
    let builder = Builder::new(
        workspace.graph,
        workspace.workspaces,
        store,
        configuration,
        Arc::new(standard_registry()),
    );
    let root = workspace
        .root_project
        .ok_or_else(|| CliError::config("serve needs a unique root project"))?;
    super::build::watch_loop(builder, &root, BuildRequest::all()).await
}

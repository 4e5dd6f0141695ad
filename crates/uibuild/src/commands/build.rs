//! The `build` command: one-shot or watching.

use crate::cli::CliError;
use crate::workspace;
use std::path::Path;
use std::sync::Arc;
use uibuild_build::{standard_registry, BuildRequest, Builder};
use uibuild_cas::BlobStore;
use uibuild_core::{BuildConfiguration, CacheMode};
use uibuild_server::{BuildServer, ServerEvent, SourceWatcher};

pub async fn run(
    config: &Path,
    cache_mode: CacheMode,
    watch: bool,
    projects: Vec<String>,
) -> Result<(), CliError> {
    let workspace = workspace::load(config)?;
    let store = Arc::new(BlobStore::open_default()?);
    let configuration = BuildConfiguration {
        cache_mode,
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

    let request = if projects.is_empty() {
        BuildRequest::all()
    } else {
        BuildRequest::for_projects(projects)
    };

    if watch {
        let root = workspace
            .root_project
            .ok_or_else(|| CliError::config("Watch mode needs a unique root project"))?;
        watch_loop(builder, &root, request).await
    } else {
        one_shot(builder, request).await
    }
}

async fn one_shot(mut builder: Builder, request: BuildRequest) -> Result<(), CliError> {
    let summary = builder.build(request).await?;
    for project in &summary.built {
        let outcome = &summary.task_outcomes[project];
        println!(
            "{project}: {} task(s) executed, {} skipped",
            outcome.executed.len(),
            outcome.skipped.len()
        );
    }
    println!("Build finished ({} project(s))", summary.built.len());
    Ok(())
}

pub(crate) async fn watch_loop(
    builder: Builder,
    root_project: &str,
    request: BuildRequest,
) -> Result<(), CliError> {
    let server = BuildServer::new(builder, root_project)?;
    let mut events = server.subscribe();

    // Initial build of everything requested.
    let initial: Vec<String> = match &request.projects {
        Some(projects) => projects.clone(),
        None => server.projects().to_vec(),
    };
    for project in &initial {
        server
            .enqueue_build(project)?
            .await
            .map_err(CliError::build)?;
    }
    println!("Initial build finished, watching for changes...");

    let watcher = SourceWatcher::start(server.clone(), uibuild_server::watcher::DEFAULT_DEBOUNCE)
        .await?;
    loop {
        match events.recv().await {
            Ok(ServerEvent::SourcesChanged { paths }) => {
                println!("Changed: {}", paths.join(", "));
                // Eagerly rebuild what the change affected; readers would
                // otherwise trigger the build on next access.
                for project in server.projects().to_vec() {
                    let _ = server.enqueue_build(&project);
                }
            }
            Ok(ServerEvent::BuildFinished { projects }) => {
                println!("Rebuilt: {}", projects.join(", "));
            }
            Ok(ServerEvent::Error { message }) => {
                eprintln!("Error: {message}");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    watcher.stop().await;
    Ok(())
}

//! The source watcher: filesystem events, debounced, applied to the
//! server.

use crate::server::BuildServer;
use crate::Result;
use notify::{RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default debounce window for file-change bursts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches every project's source root and feeds debounced change batches
/// into the build server.
pub struct SourceWatcher {
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    // Kept alive: dropping the watcher cancels the subscriptions.
    _watcher: notify::RecommendedWatcher,
}

impl SourceWatcher {
    /// Subscribe to all project source roots and start the debounce loop.
    pub async fn start(server: BuildServer, debounce: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                if let Ok(event) = result {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
            })?;

        let roots: Vec<PathBuf> = {
            let builder = server.inner.builder.lock().await;
            builder.graph().iter().map(|p| p.source_root.clone()).collect()
        };
        for root in roots {
            if root.is_dir() {
                watcher.watch(&root, RecursiveMode::Recursive)?;
                debug!(root = %root.display(), "Watching source root");
            }
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(debounce_loop(
            server,
            rx,
            debounce,
            shutdown.clone(),
        ));
        info!("Source watcher started");
        Ok(Self {
            shutdown,
            handle,
            _watcher: watcher,
        })
    }

    /// Cancel the subscriptions and await the debounce loop's shutdown.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
        info!("Source watcher stopped");
    }
}

/// Collect events until the window closes, then hand the de-duplicated
/// batch to the server.
async fn debounce_loop(
    server: BuildServer,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    debounce: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            () = shutdown.cancelled() => return,
            path = rx.recv() => match path {
                Some(path) => path,
                None => return,
            },
        };

        let mut batch = vec![first];
        let deadline = tokio::time::Instant::now() + debounce;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep_until(deadline) => break,
                path = rx.recv() => match path {
                    Some(path) => batch.push(path),
                    None => break,
                },
            }
        }
        batch.sort();
        batch.dedup();
        debug!(changes = batch.len(), "Debounce window closed");

        if let Err(e) = server.apply_source_changes(&batch).await {
            server.emit_error(format!("failed to apply source changes: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ServerEvent;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uibuild_build::{standard_registry, Builder};
    use uibuild_cas::BlobStore;
    use uibuild_core::{
        BuildConfiguration, MemoryReader, Project, ProjectGraph, ProjectKind,
    };

    fn watched_fixture(tmp: &TempDir) -> BuildServer {
        let app_root = tmp.path().join("app");
        std::fs::create_dir_all(&app_root).unwrap();
        std::fs::write(app_root.join("Component.js"), "function Component() {}\n").unwrap();

        let mut graph = ProjectGraph::new();
        graph.insert(Project {
            id: "my.app".into(),
            version: "1.0.0".into(),
            kind: ProjectKind::Application,
            namespace: "/resources/my/app".into(),
            source_root: app_root.clone(),
            custom_tasks: Vec::new(),
            extensions: Vec::new(),
            middleware: Vec::new(),
        });
        graph.resolve_edges().unwrap();

        let workspace = MemoryReader::new();
        workspace.load_dir(&app_root, "/resources/my/app").unwrap();
        let mut workspaces = BTreeMap::new();
        workspaces.insert("my.app".to_string(), workspace);

        let builder = Builder::new(
            graph,
            workspaces,
            Arc::new(BlobStore::new(tmp.path().join("store"))),
            BuildConfiguration::default(),
            Arc::new(standard_registry()),
        );
        BuildServer::new(builder, "my.app").unwrap()
    }

    #[tokio::test]
    async fn watcher_picks_up_changes_and_emits_events() {
        let tmp = TempDir::new().unwrap();
        let server = watched_fixture(&tmp);
        server.enqueue_build("my.app").unwrap().await.unwrap();

        let mut events = server.subscribe();
        let watcher = SourceWatcher::start(server.clone(), DEFAULT_DEBOUNCE)
            .await
            .unwrap();

        // Give the backend a moment to arm, then touch a source file.
        tokio::time::sleep(Duration::from_millis(250)).await;
        std::fs::write(
            tmp.path().join("app/Component.js"),
            "function Component() { /* edited */ }\n",
        )
        .unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(ServerEvent::SourcesChanged { paths }) => break paths,
                    Ok(_) => {}
                    Err(e) => panic!("event stream closed: {e}"),
                }
            }
        })
        .await
        .expect("no sourcesChanged event within timeout");
        assert!(changed.contains(&"/resources/my/app/Component.js".to_string()));

        // A subsequent read observes a fresh build with the edit.
        use uibuild_core::Reader;
        let reader = server.reader(crate::reader::ReaderScope::AllProjects);
        let resource = reader
            .by_path("/resources/my/app/Component.min.js")
            .await
            .expect("minified output");
        assert!(String::from_utf8_lossy(&resource.buffer()).contains("edited"));

        watcher.stop().await;
    }

    #[tokio::test]
    async fn stop_terminates_the_loop() {
        let tmp = TempDir::new().unwrap();
        let server = watched_fixture(&tmp);
        let watcher = SourceWatcher::start(server, Duration::from_millis(50))
            .await
            .unwrap();
        watcher.stop().await;
    }
}

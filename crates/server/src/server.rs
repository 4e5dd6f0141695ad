//! The build server: lazy builds with request coalescing.
//!
//! A `buildQueue` maps project names to shared build promises and a
//! pending set collects the projects of the next batch. At most one batch
//! build runs at a time; concurrent requests for the same project share
//! one promise, and a project invalidated mid-build is re-enqueued so
//! every requester eventually observes a build newer than its request.

use crate::event::ServerEvent;
use crate::{Error, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};
use uibuild_build::{BuildRequest, Builder};
use uibuild_core::{MemoryReader, ProjectGraph};

/// A shared build result: every requester of a project awaits the same
/// promise.
pub type BuildPromise = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

const EVENT_CAPACITY: usize = 64;

struct QueueState {
    pending: BTreeSet<String>,
    queue: HashMap<String, BuildPromise>,
    senders: HashMap<String, oneshot::Sender<std::result::Result<(), String>>>,
    processing: bool,
}

pub(crate) struct ServerInner {
    pub(crate) builder: tokio::sync::Mutex<Builder>,
    state: Mutex<QueueState>,
    pub(crate) events: broadcast::Sender<ServerEvent>,
    /// `(namespace, project id)`, longest namespace first.
    pub(crate) namespaces: Vec<(String, String)>,
    pub(crate) projects: Vec<String>,
    pub(crate) root_project: String,
}

/// The build server handle; cheap to clone.
#[derive(Clone)]
pub struct BuildServer {
    pub(crate) inner: Arc<ServerInner>,
}

impl BuildServer {
    /// Wrap a builder. `root_project` determines the scope split of the
    /// root-only and dependencies-only readers.
    pub fn new(builder: Builder, root_project: &str) -> Result<Self> {
        let graph = builder.graph();
        if !graph.contains(root_project) {
            return Err(Error::UnknownProject(root_project.to_string()));
        }
        let mut namespaces: Vec<(String, String)> = graph
            .iter()
            .map(|p| (p.namespace.clone(), p.id.clone()))
            .collect();
        namespaces.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        let projects: Vec<String> = graph.iter().map(|p| p.id.clone()).collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(ServerInner {
                builder: tokio::sync::Mutex::new(builder),
                state: Mutex::new(QueueState {
                    pending: BTreeSet::new(),
                    queue: HashMap::new(),
                    senders: HashMap::new(),
                    processing: false,
                }),
                events,
                namespaces,
                projects,
                root_project: root_project.to_string(),
            }),
        })
    }

    /// Subscribe to server events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn root_project(&self) -> &str {
        &self.inner.root_project
    }

    #[must_use]
    pub fn projects(&self) -> &[String] {
        &self.inner.projects
    }

    /// Request a build of one project. Returns the shared promise of the
    /// batch the project will be (or already is) part of, and kicks the
    /// processor if it is idle.
    pub fn enqueue_build(&self, project: &str) -> Result<BuildPromise> {
        if !self.inner.projects.iter().any(|p| p == project) {
            return Err(Error::UnknownProject(project.to_string()));
        }
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(promise) = state.queue.get(project) {
            return Ok(promise.clone());
        }
        let (tx, rx) = oneshot::channel();
        let promise: BuildPromise = rx
            .map(|received| match received {
                Ok(outcome) => outcome,
                Err(_) => Err("build request dropped".to_string()),
            })
            .boxed()
            .shared();
        state.queue.insert(project.to_string(), promise.clone());
        state.senders.insert(project.to_string(), tx);
        state.pending.insert(project.to_string());
        let start = !state.processing;
        state.processing = true;
        drop(state);

        if start {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(process_queue(inner));
        }
        debug!(project, "Enqueued build request");
        Ok(promise)
    }

    /// Snapshot of a project's workspace reader.
    pub async fn workspace_snapshot(&self, project: &str) -> Option<MemoryReader> {
        let builder = self.inner.builder.lock().await;
        builder.workspace(project).cloned()
    }

    /// Route a virtual path to the owning project by longest-matching
    /// namespace prefix, restricted to `scope`.
    #[must_use]
    pub(crate) fn route(&self, virtual_path: &str, scope: &[String]) -> Option<String> {
        for (namespace, project) in &self.inner.namespaces {
            if !scope.iter().any(|p| p == project) {
                continue;
            }
            let trimmed = namespace.trim_end_matches('/');
            if virtual_path == trimmed
                || virtual_path.starts_with(&format!("{trimmed}/"))
            {
                return Some(project.clone());
            }
        }
        None
    }

    /// Apply a batch of filesystem changes: reload the touched resources
    /// into their project workspaces, invalidate the affected caches,
    /// re-enqueue projects that were already queued, and emit
    /// `sourcesChanged`. Returns the transitively affected projects.
    pub async fn apply_source_changes(&self, fs_paths: &[PathBuf]) -> Result<Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut affected_all: BTreeSet<String> = BTreeSet::new();
        {
            let mut builder = self.inner.builder.lock().await;
            for fs_path in fs_paths {
                let Some((project_id, virtual_path)) = map_fs_path(builder.graph(), fs_path)
                else {
                    continue;
                };
                if let Some(workspace) = builder.workspace(&project_id) {
                    match tokio::fs::read(fs_path).await {
                        Ok(content) => {
                            workspace.insert(virtual_path.clone(), content);
                        }
                        Err(_) => {
                            workspace.remove(&virtual_path);
                        }
                    }
                }
                grouped.entry(project_id).or_default().push(virtual_path);
            }
            for (project, paths) in &grouped {
                for affected in builder.invalidate_project_sources(project, paths).await? {
                    affected_all.insert(affected);
                }
            }
        }

        let affected: Vec<String> = affected_all.into_iter().collect();
        if affected.is_empty() {
            return Ok(affected);
        }
        self.requeue_if_queued(&affected);

        let paths: Vec<String> = grouped.into_values().flatten().collect();
        debug!(?paths, "Sources changed");
        let _ = self
            .inner
            .events
            .send(ServerEvent::SourcesChanged { paths });
        Ok(affected)
    }

    /// Projects already in the queue get re-added to the pending set, so
    /// the processor rebuilds them after the current batch. No watcher
    /// event is ever silently lost.
    fn requeue_if_queued(&self, affected: &[String]) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        for project in affected {
            if state.queue.contains_key(project) {
                state.pending.insert(project.clone());
            }
        }
    }

    pub(crate) fn emit_error(&self, message: String) {
        warn!("{message}");
        let _ = self.inner.events.send(ServerEvent::Error { message });
    }
}

/// The batch processor: drains the pending set, runs one build over it,
/// settles the batch's promises, and loops until the pending set stays
/// empty. Exactly one processor runs at a time.
async fn process_queue(inner: Arc<ServerInner>) {
    loop {
        let batch: Vec<String> = {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.pending.is_empty() {
                state.processing = false;
                return;
            }
            std::mem::take(&mut state.pending).into_iter().collect()
        };
        debug!(?batch, "Processing build batch");

        let (summary, error) = {
            let mut builder = inner.builder.lock().await;
            builder
                .try_build(BuildRequest::for_projects(batch.clone()))
                .await
        };
        let built: BTreeSet<&String> = summary.built.iter().collect();
        let failure = error.as_ref().map(ToString::to_string);

        {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            for project in &batch {
                let succeeded = failure.is_none() || built.contains(project);
                if let Some(tx) = state.senders.remove(project) {
                    let outcome = if succeeded {
                        Ok(())
                    } else {
                        Err(failure.clone().unwrap_or_default())
                    };
                    let _ = tx.send(outcome);
                }
                // A project re-enqueued during the build stays in the
                // pending set and is rebuilt by the next iteration.
                state.queue.remove(project);
            }
        }

        match failure {
            None => {
                let _ = inner.events.send(ServerEvent::BuildFinished {
                    projects: summary.built,
                });
            }
            Some(message) => {
                warn!("Batch build failed: {message}");
                let _ = inner.events.send(ServerEvent::Error { message });
            }
        }
    }
}

/// Map a filesystem path to `(project id, virtual path)` via the longest
/// matching project source root.
pub(crate) fn map_fs_path(graph: &ProjectGraph, fs_path: &Path) -> Option<(String, String)> {
    let mut best: Option<(&Path, &str, &str)> = None;
    for project in graph.iter() {
        if let Ok(rel) = fs_path.strip_prefix(&project.source_root) {
            let root = project.source_root.as_path();
            let better = best.is_none_or(|(b, _, _)| root.as_os_str().len() > b.as_os_str().len());
            if better && !rel.as_os_str().is_empty() {
                best = Some((root, &project.id, &project.namespace));
            }
        }
    }
    best.map(|(root, id, namespace)| {
        let rel = fs_path
            .strip_prefix(root)
            .map(|r| r.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
            .unwrap_or_default();
        (
            id.to_string(),
            format!("{}/{rel}", namespace.trim_end_matches('/')),
        )
    })
}

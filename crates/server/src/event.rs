//! Events the build server broadcasts to its host.

/// One server event; delivered over a tokio broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Source files changed; carries the merged list of changed virtual
    /// paths after debouncing.
    SourcesChanged { paths: Vec<String> },
    /// One batch build finished successfully.
    BuildFinished { projects: Vec<String> },
    /// A recoverable failure; the server keeps watching.
    Error { message: String },
}

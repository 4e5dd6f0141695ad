//! The monitored reader: records every read a task issues.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uibuild_core::{Reader, RequestRecording, Resource};

/// Wraps a reader and records every `by_path` call into the recording's
/// path set and every `by_glob` call into its pattern list.
pub struct MonitoredReader {
    inner: Arc<dyn Reader>,
    recording: Mutex<RequestRecording>,
}

impl MonitoredReader {
    #[must_use]
    pub fn new(inner: Arc<dyn Reader>) -> Self {
        Self {
            inner,
            recording: Mutex::new(RequestRecording::default()),
        }
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn recording(&self) -> RequestRecording {
        self.recording
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Take the recording, leaving an empty one behind.
    #[must_use]
    pub fn take_recording(&self) -> RequestRecording {
        std::mem::take(&mut *self.recording.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl Reader for MonitoredReader {
    async fn by_path(&self, virtual_path: &str) -> Option<Arc<Resource>> {
        {
            let mut recording = self.recording.lock().unwrap_or_else(|e| e.into_inner());
            recording.paths.insert(virtual_path.to_string());
        }
        self.inner.by_path(virtual_path).await
    }

    async fn by_glob(&self, patterns: &[String]) -> Vec<Arc<Resource>> {
        {
            let mut recording = self.recording.lock().unwrap_or_else(|e| e.into_inner());
            recording.patterns.push(patterns.to_vec());
        }
        self.inner.by_glob(patterns).await
    }
}

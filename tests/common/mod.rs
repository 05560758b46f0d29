//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use content_updater::app::{
    DiagnosticResult, Diagnostics, Digest, DownloadAgent, DownloadTask, PatchTool, ProgressEvent,
    ProgressSink, StaticManifestSource, UpdateManager,
};
use content_updater::errors::{DownloadError, DownloadResult, PatchError, PatchResult};

/// Agent serving canned bodies by URL; unknown URLs fail
#[derive(Default)]
pub struct MapAgent {
    bodies: HashMap<String, Vec<u8>>,
    pub calls: AtomicUsize,
}

impl MapAgent {
    pub fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }
}

#[async_trait]
impl DownloadAgent for MapAgent {
    async fn download(&self, task: &DownloadTask, progress: &ProgressSink) -> DownloadResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .get(&task.url)
            .ok_or_else(|| DownloadError::AgentFailed {
                url: task.url.clone(),
                code: Some(1),
            })?;
        if let Some(parent) = task.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&task.destination, body).await?;
        progress(ProgressEvent::Downloading {
            percentage: 100,
            speed: "1MiB".to_string(),
            eta: "0s".to_string(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "map"
    }
}

/// Patch tool that writes the delta's bytes as the output
pub struct CopyDeltaTool;

#[async_trait]
impl PatchTool for CopyDeltaTool {
    async fn apply(&self, _source: &Path, delta: &Path, output: &Path) -> PatchResult<()> {
        tokio::fs::copy(delta, output)
            .await
            .map_err(|e| PatchError::PatchApplicationFailed {
                diagnostics: e.to_string(),
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "copy-delta"
    }
}

/// Diagnostics returning a fixed sweep
pub struct FixedDiagnostics(pub Vec<DiagnosticResult>);

#[async_trait]
impl Diagnostics for FixedDiagnostics {
    async fn check_all(&self) -> Vec<DiagnosticResult> {
        self.0.clone()
    }
}

/// Collects every progress event
pub fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink: ProgressSink = Arc::new(move |event| {
        sink_events.lock().unwrap().push(event);
    });
    (sink, events)
}

pub fn hex(data: &[u8]) -> String {
    Digest::of_bytes(data).to_hex()
}

pub fn manager(
    root: &TempDir,
    data: &TempDir,
    manifest: &str,
    agent: Arc<dyn DownloadAgent>,
) -> UpdateManager {
    UpdateManager::builder(root.path(), data.path())
        .with_manifest_source(Arc::new(StaticManifestSource::new(manifest)))
        .with_download_agent(agent)
        .with_patch_tool(Arc::new(CopyDeltaTool))
        .with_diagnostics(Arc::new(FixedDiagnostics(Vec::new())))
        .build()
        .unwrap()
}

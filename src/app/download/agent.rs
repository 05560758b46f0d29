//! Download agents
//!
//! A [`DownloadAgent`] fetches one URL to one destination. The default agent
//! drives the external `aria2c` process and turns its console summary lines
//! into progress events; [`HttpAgent`] is an in-process fallback built on the
//! rate-limited HTTP client.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::client::{DownloadHandler, HttpHandler};
use crate::app::operation::{ProgressEvent, ProgressSink};
use crate::constants::tools;
use crate::errors::{DownloadError, DownloadResult};

/// One file to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub destination: PathBuf,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
        }
    }
}

/// Fetches a single URL to a destination path
#[async_trait]
pub trait DownloadAgent: Send + Sync {
    /// Download `task`, replacing any existing destination file
    async fn download(&self, task: &DownloadTask, progress: &ProgressSink) -> DownloadResult<()>;

    /// Agent name for log lines
    fn name(&self) -> &str;
}

/// `aria2c` subprocess agent
#[derive(Debug, Clone)]
pub struct Aria2Agent {
    executable: PathBuf,
    progress_pattern: Regex,
}

impl Aria2Agent {
    /// Use the given executable (a bare name is looked up on `PATH`)
    pub fn new(executable: impl Into<PathBuf>) -> DownloadResult<Self> {
        let progress_pattern =
            Regex::new(tools::ARIA2_PROGRESS_PATTERN).map_err(|e| DownloadError::Configuration {
                reason: e.to_string(),
            })?;
        Ok(Self {
            executable: executable.into(),
            progress_pattern,
        })
    }

    /// Configured executable
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Parse a console summary line such as
    /// `[#123456 1.2MiB/4.5MiB(26%) CN:1 DL:1.2MiB ETA:2s]`
    pub fn parse_progress(&self, line: &str) -> Option<ProgressEvent> {
        let caps = self.progress_pattern.captures(line)?;
        let percentage = caps.name("percent")?.as_str().parse::<u8>().ok()?;
        Some(ProgressEvent::Downloading {
            percentage: percentage.min(100),
            speed: caps.name("speed")?.as_str().to_string(),
            eta: caps.name("eta")?.as_str().to_string(),
        })
    }

    fn arguments(task: &DownloadTask) -> Vec<String> {
        let dir = task
            .destination
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let file_name = task
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        vec![
            task.url.clone(),
            "--dir".to_string(),
            dir,
            "--out".to_string(),
            file_name,
            "--allow-overwrite=true".to_string(),
            "--auto-file-renaming=false".to_string(),
            "--console-log-level=info".to_string(),
            "--summary-interval=1".to_string(),
        ]
    }
}

#[async_trait]
impl DownloadAgent for Aria2Agent {
    async fn download(&self, task: &DownloadTask, progress: &ProgressSink) -> DownloadResult<()> {
        if let Some(parent) = task.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("aria2c: {} -> {}", task.url, task.destination.display());
        let mut child = Command::new(&self.executable)
            .args(Self::arguments(task))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::AgentSpawn {
                agent: self.executable.display().to_string(),
                reason: e.to_string(),
            })?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(event) = self.parse_progress(&line) {
                    progress(event);
                }
            }
        }

        let status = child.wait().await?;
        if status.success() {
            debug!("aria2c finished {}", task.url);
            Ok(())
        } else {
            warn!("aria2c failed for {} with {}", task.url, status);
            Err(DownloadError::AgentFailed {
                url: task.url.clone(),
                code: status.code(),
            })
        }
    }

    fn name(&self) -> &str {
        "aria2c"
    }
}

/// In-process HTTP agent with atomic temp-file writes
#[derive(Debug, Clone)]
pub struct HttpAgent {
    handler: Arc<HttpHandler>,
}

impl HttpAgent {
    pub fn new(handler: Arc<HttpHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl DownloadAgent for HttpAgent {
    async fn download(&self, task: &DownloadTask, progress: &ProgressSink) -> DownloadResult<()> {
        let url = Url::parse(&task.url).map_err(|e| DownloadError::InvalidUrl {
            url: task.url.clone(),
            error: e.to_string(),
        })?;

        let started = Instant::now();
        let last_percentage = AtomicU8::new(u8::MAX);
        let report = |downloaded: u64, total: Option<u64>| {
            let Some(total) = total.filter(|t| *t > 0) else {
                return;
            };
            let percentage = ((downloaded.min(total) * 100) / total) as u8;
            // Only forward whole-percent changes
            if last_percentage.swap(percentage, Ordering::Relaxed) == percentage {
                return;
            }
            let elapsed = started.elapsed().as_secs_f64().max(0.001);
            let rate = downloaded as f64 / elapsed;
            let remaining = total.saturating_sub(downloaded) as f64;
            progress(ProgressEvent::Downloading {
                percentage,
                speed: format_rate(rate),
                eta: format!("{}s", (remaining / rate.max(1.0)).ceil() as u64),
            });
        };

        DownloadHandler::new(&self.handler)
            .download_file(&url, &task.destination, &report)
            .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn format_rate(bytes_per_sec: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    if bytes_per_sec >= MIB {
        format!("{:.1}MiB", bytes_per_sec / MIB)
    } else if bytes_per_sec >= KIB {
        format!("{:.1}KiB", bytes_per_sec / KIB)
    } else {
        format!("{:.0}B", bytes_per_sec)
    }
}

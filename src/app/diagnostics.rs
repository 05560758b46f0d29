//! Environment diagnostics
//!
//! A sweep over the things an update depends on: the external tools, network
//! reachability, write access to the application data directory and free
//! disk space. Only a failed permission check blocks recovery; everything
//! else is advisory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::{diagnostics, files, http, tools};

const TOOL_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome severity of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticStatus {
    Ok,
    Warning,
    Error,
}

/// One check's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub name: String,
    pub status: DiagnosticStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DiagnosticResult {
    pub fn new(name: &str, status: DiagnosticStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            version: None,
        }
    }

    fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Whether a sweep contains a failure that must block recovery
pub fn is_fatal(results: &[DiagnosticResult]) -> bool {
    results
        .iter()
        .any(|r| r.name == diagnostics::PERMISSIONS_CHECK && r.status == DiagnosticStatus::Error)
}

/// Runs the diagnostic sweep
#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn check_all(&self) -> Vec<DiagnosticResult>;
}

/// Default diagnostics against the local machine
#[derive(Debug, Clone)]
pub struct Doctor {
    app_data_dir: PathBuf,
    xdelta_path: PathBuf,
    aria2_path: PathBuf,
    probe_url: String,
    client: Client,
}

impl Doctor {
    pub fn new(app_data_dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            app_data_dir: app_data_dir.into(),
            xdelta_path: PathBuf::from(tools::DEFAULT_XDELTA),
            aria2_path: PathBuf::from(tools::DEFAULT_ARIA2),
            probe_url: http::CONNECTIVITY_PROBE_URL.to_string(),
            client,
        }
    }

    /// Use specific tool executables
    pub fn with_tools(mut self, xdelta: impl Into<PathBuf>, aria2: impl Into<PathBuf>) -> Self {
        self.xdelta_path = xdelta.into();
        self.aria2_path = aria2.into();
        self
    }

    /// Probe a different URL for connectivity
    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = url.into();
        self
    }

    /// Check that a tool starts and reports a version
    pub async fn check_tool(name: &str, executable: &Path, version_flag: &str) -> DiagnosticResult {
        let run = Command::new(executable)
            .arg(version_flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match timeout(TOOL_CHECK_TIMEOUT, run).await {
            Ok(Ok(output)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string());
                DiagnosticResult::new(name, DiagnosticStatus::Ok, "Tool functional.")
                    .with_version(version)
            }
            Ok(Ok(output)) => DiagnosticResult::new(
                name,
                DiagnosticStatus::Error,
                format!("Execution failed: {}", output.status),
            )
            .with_version("Error"),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => DiagnosticResult::new(
                name,
                DiagnosticStatus::Error,
                format!("Executable not found: {}", executable.display()),
            )
            .with_version("Not found"),
            Ok(Err(e)) => DiagnosticResult::new(
                name,
                DiagnosticStatus::Error,
                format!("Execution failed: {}", e),
            )
            .with_version("Error"),
            Err(_) => DiagnosticResult::new(
                name,
                DiagnosticStatus::Error,
                "Execution timed out",
            )
            .with_version("Error"),
        }
    }

    async fn check_connectivity(&self) -> DiagnosticResult {
        let request = self
            .client
            .get(&self.probe_url)
            .timeout(http::CONNECTIVITY_TIMEOUT)
            .send();
        match request.await {
            Ok(_) => DiagnosticResult::new(
                diagnostics::CONNECTIVITY_CHECK,
                DiagnosticStatus::Ok,
                "Internet connection stable.",
            ),
            Err(e) => DiagnosticResult::new(
                diagnostics::CONNECTIVITY_CHECK,
                DiagnosticStatus::Warning,
                format!("Failed to reach external servers: {}", e),
            ),
        }
    }

    /// Write and delete a probe file in the data directory
    pub fn check_permissions(&self) -> DiagnosticResult {
        let probe = self.app_data_dir.join(files::WRITE_TEST_FILE);
        let result = std::fs::create_dir_all(&self.app_data_dir)
            .and_then(|_| std::fs::write(&probe, b"test"))
            .and_then(|_| std::fs::remove_file(&probe));

        match result {
            Ok(()) => DiagnosticResult::new(
                diagnostics::PERMISSIONS_CHECK,
                DiagnosticStatus::Ok,
                "Write permissions verified.",
            ),
            Err(e) => DiagnosticResult::new(
                diagnostics::PERMISSIONS_CHECK,
                DiagnosticStatus::Error,
                format!("No write access to {}: {}", self.app_data_dir.display(), e),
            ),
        }
    }

    /// Warn when free space in the data directory is low
    pub fn check_disk_space(&self) -> DiagnosticResult {
        match fs2::available_space(&self.app_data_dir) {
            Ok(free) if free < diagnostics::MIN_FREE_SPACE_BYTES => DiagnosticResult::new(
                diagnostics::DISK_SPACE_CHECK,
                DiagnosticStatus::Warning,
                format!(
                    "Critically low disk space: {:.2} GB free.",
                    free as f64 / (1024.0 * 1024.0 * 1024.0)
                ),
            ),
            Ok(_) => DiagnosticResult::new(
                diagnostics::DISK_SPACE_CHECK,
                DiagnosticStatus::Ok,
                "Sufficient disk space available.",
            ),
            Err(e) => {
                debug!("Free space query failed: {}", e);
                DiagnosticResult::new(
                    diagnostics::DISK_SPACE_CHECK,
                    DiagnosticStatus::Ok,
                    "Free space could not be determined.",
                )
            }
        }
    }

    /// Remove stale `*.tmp` files from the data directory
    pub fn attempt_repair(&self) -> Vec<DiagnosticResult> {
        let removed = std::fs::read_dir(&self.app_data_dir).and_then(|entries| {
            let mut count = 0;
            for entry in entries {
                let path = entry?.path();
                let is_temp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(files::TEMP_FILE_SUFFIX))
                    .unwrap_or(false);
                if is_temp && path.is_file() {
                    std::fs::remove_file(&path)?;
                    count += 1;
                }
            }
            Ok(count)
        });

        let result = match removed {
            Ok(count) => {
                info!("Removed {} temporary files", count);
                DiagnosticResult::new(
                    "Cleanup",
                    DiagnosticStatus::Ok,
                    format!("Removed {} temporary files.", count),
                )
            }
            Err(e) => DiagnosticResult::new("Cleanup", DiagnosticStatus::Error, e.to_string()),
        };
        vec![result]
    }
}

#[async_trait]
impl Diagnostics for Doctor {
    async fn check_all(&self) -> Vec<DiagnosticResult> {
        let results = vec![
            Self::check_tool("aria2c", &self.aria2_path, tools::ARIA2_VERSION_FLAG).await,
            Self::check_tool("xdelta3", &self.xdelta_path, tools::XDELTA_VERSION_FLAG).await,
            self.check_connectivity().await,
            self.check_permissions(),
            self.check_disk_space(),
        ];

        for r in &results {
            match r.status {
                DiagnosticStatus::Ok => debug!("{}: {}", r.name, r.message),
                DiagnosticStatus::Warning | DiagnosticStatus::Error => {
                    warn!("{}: {}", r.name, r.message)
                }
            }
        }
        results
    }
}

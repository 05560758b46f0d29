//! Operation executor
//!
//! Applies a plan against the content root in two phases: every full
//! download as one batch, then every delta patch strictly one after another.
//! The session lock and operation log bracket the whole run. Both are left
//! in place when a phase fails, so the next start sees an interrupted
//! session and routes through recovery.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::app::download::{DownloadAgent, DownloadQueue, DownloadTask};
use crate::app::oplog::{OperationLog, OperationStatus};
use crate::app::operation::{Operation, OperationKind, ProgressEvent, ProgressSink};
use crate::app::patcher::BinaryPatcher;
use crate::app::paths;
use crate::app::session::SessionLock;
use crate::constants::{files, oplog};
use crate::errors::OperationLogResult;

/// Message returned when the download batch fails
pub const DOWNLOADS_FAILED: &str = "some downloads failed";
/// Message returned when every operation succeeded
pub const ALL_COMPLETED: &str = "all operations completed successfully";

/// Result of applying a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub message: String,
}

impl ExecutionOutcome {
    fn succeeded(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Executes operation plans for one content root
pub struct OperationExecutor {
    content_root: PathBuf,
    staging_dir: PathBuf,
    lock: SessionLock,
    log: Mutex<OperationLog>,
    agent: Arc<dyn DownloadAgent>,
    patcher: BinaryPatcher,
    download_concurrency: usize,
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("content_root", &self.content_root)
            .field("staging_dir", &self.staging_dir)
            .field("agent", &self.agent.name())
            .finish()
    }
}

impl OperationExecutor {
    /// Create an executor
    ///
    /// The operation log lives at `<app_data>/operations.json` and deltas are
    /// staged under `<app_data>/staging`.
    pub fn new(
        content_root: impl Into<PathBuf>,
        app_data_dir: &Path,
        agent: Arc<dyn DownloadAgent>,
        patcher: BinaryPatcher,
    ) -> Self {
        let content_root = content_root.into();
        Self {
            lock: SessionLock::for_root(&content_root),
            log: Mutex::new(OperationLog::open(
                app_data_dir.join(files::OPERATION_LOG_FILE),
            )),
            staging_dir: app_data_dir.join(files::STAGING_DIR),
            content_root,
            agent,
            patcher,
            download_concurrency: 1,
        }
    }

    /// Number of downloads run at once in the download phase
    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency.max(1);
        self
    }

    /// Session lock guarding this executor's content root
    pub fn session_lock(&self) -> &SessionLock {
        &self.lock
    }

    /// Run `f` against the operation log
    pub fn with_log<R>(
        &self,
        f: impl FnOnce(&mut OperationLog) -> OperationLogResult<R>,
    ) -> OperationLogResult<R> {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut log)
    }

    /// Apply `operations` in order; see the module docs for the phases
    ///
    /// The first failing phase stops the run. Operations after it are never
    /// started or logged.
    ///
    /// # Arguments
    ///
    /// * `operations` - Plan from [`OperationPlanner`](crate::app::OperationPlanner); no-ops are skipped
    /// * `progress` - Receives phase, download and patch events, then one
    ///   final `Complete` or `Error`
    ///
    /// # Returns
    ///
    /// An [`ExecutionOutcome`] rather than an error. On failure the session
    /// lock and operation log stay behind for recovery.
    pub async fn apply(&self, operations: &[Operation], progress: &ProgressSink) -> ExecutionOutcome {
        let outcome = self.run(operations, progress).await;
        if outcome.success {
            progress(ProgressEvent::Complete {
                message: outcome.message.clone(),
            });
        } else {
            error!("Update session failed: {}", outcome.message);
            progress(ProgressEvent::Error {
                message: outcome.message.clone(),
            });
        }
        outcome
    }

    async fn run(&self, operations: &[Operation], progress: &ProgressSink) -> ExecutionOutcome {
        if let Err(e) = self.lock.acquire() {
            return ExecutionOutcome::failed(format!("could not create session lock: {}", e));
        }
        if let Err(e) = self.with_log(|log| log.clear()) {
            return ExecutionOutcome::failed(format!("could not reset operation log: {}", e));
        }
        progress(ProgressEvent::ApplyingUpdates);

        let downloads: Vec<&Operation> = operations
            .iter()
            .filter(|o| o.kind == OperationKind::DownloadFull)
            .collect();
        let patches: Vec<&Operation> = operations
            .iter()
            .filter(|o| o.kind == OperationKind::PatchDelta)
            .collect();
        info!(
            "Applying {} downloads and {} patches to {}",
            downloads.len(),
            patches.len(),
            self.content_root.display()
        );

        if !downloads.is_empty() {
            if let Err(outcome) = self.download_phase(&downloads, progress).await {
                return outcome;
            }
        }

        for (i, op) in patches.iter().enumerate() {
            if let Err(outcome) = self.patch_one(i, patches.len(), op, progress).await {
                return outcome;
            }
        }

        if let Err(e) = self.lock.release() {
            return ExecutionOutcome::failed(format!("could not remove session lock: {}", e));
        }
        if let Err(e) = self.with_log(|log| log.clear()) {
            warn!("Could not clear operation log: {}", e);
        }
        info!("Update session finished");
        ExecutionOutcome::succeeded(ALL_COMPLETED)
    }

    async fn download_phase(
        &self,
        downloads: &[&Operation],
        progress: &ProgressSink,
    ) -> Result<(), ExecutionOutcome> {
        let mut queue =
            DownloadQueue::new(Arc::clone(&self.agent)).with_concurrency(self.download_concurrency);

        for (i, op) in downloads.iter().enumerate() {
            let url = op.url.clone().ok_or_else(|| {
                ExecutionOutcome::failed(format!("no download url for {}", op.relative_path))
            })?;
            self.with_log(|log| log.log(&download_id(i), op))
                .map_err(log_failure)?;
            queue.add_task(DownloadTask::new(
                url,
                paths::content_path(&self.content_root, &op.relative_path),
            ));
        }

        let report = queue.process_all(progress).await;
        if !report.all_succeeded() {
            for failure in report.failures() {
                warn!(
                    "Failed: {} ({})",
                    failure.task.url,
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
            return Err(ExecutionOutcome::failed(DOWNLOADS_FAILED));
        }

        self.with_log(|log| {
            for i in 0..downloads.len() {
                log.update_status(&download_id(i), OperationStatus::Completed)?;
            }
            Ok(())
        })
        .map_err(log_failure)
    }

    async fn patch_one(
        &self,
        index: usize,
        total: usize,
        op: &Operation,
        progress: &ProgressSink,
    ) -> Result<(), ExecutionOutcome> {
        let id = patch_id(index);
        let fail = |reason: String| {
            ExecutionOutcome::failed(format!(
                "Patching failed for {}: {}",
                op.relative_path, reason
            ))
        };

        self.with_log(|log| log.log(&id, op)).map_err(log_failure)?;
        progress(ProgressEvent::Patching {
            current: index + 1,
            total,
            file: op.relative_path.clone(),
        });

        let patch_url = op
            .patch_url
            .clone()
            .ok_or_else(|| fail("no patch url".to_string()))?;
        let staged = self.staged_delta_path(&op.relative_path);

        let mut queue = DownloadQueue::new(Arc::clone(&self.agent));
        queue.add_task(DownloadTask::new(patch_url, staged.clone()));
        let report = queue.process_all(progress).await;
        if !report.all_succeeded() {
            let reason = report
                .failures()
                .filter_map(|f| f.error.clone())
                .next()
                .unwrap_or_else(|| "delta download failed".to_string());
            return Err(fail(format!("could not fetch delta: {}", reason)));
        }

        let source = paths::content_path(&self.content_root, &op.relative_path);
        let patched = self
            .patcher
            .apply_delta(&source, &staged, &op.target_digest)
            .await;

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            warn!("Could not remove staged delta {}: {}", staged.display(), e);
        }
        patched.map_err(|e| fail(e.to_string()))?;

        self.with_log(|log| log.update_status(&id, OperationStatus::Completed))
            .map_err(log_failure)
    }

    fn staged_delta_path(&self, relative_path: &str) -> PathBuf {
        paths::with_suffix(
            &paths::content_path(&self.staging_dir, relative_path),
            files::DELTA_FILE_SUFFIX,
        )
    }
}

fn download_id(index: usize) -> String {
    format!("{}_{}", oplog::DOWNLOAD_ID_PREFIX, index)
}

fn patch_id(index: usize) -> String {
    format!("{}_{}", oplog::PATCH_ID_PREFIX, index)
}

fn log_failure(e: crate::errors::OperationLogError) -> ExecutionOutcome {
    ExecutionOutcome::failed(format!("operation log write failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::operation::silent_sink;
    use crate::app::patcher::PatchTool;
    use crate::errors::{DownloadError, DownloadResult, PatchResult};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FailingAgent;

    #[async_trait]
    impl DownloadAgent for FailingAgent {
        async fn download(&self, task: &DownloadTask, _: &ProgressSink) -> DownloadResult<()> {
            Err(DownloadError::AgentFailed {
                url: task.url.clone(),
                code: Some(1),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct NeverTool;

    #[async_trait]
    impl PatchTool for NeverTool {
        async fn apply(&self, _: &Path, _: &Path, _: &Path) -> PatchResult<()> {
            unreachable!("no patches in these tests")
        }

        fn name(&self) -> &str {
            "never"
        }
    }

    fn download_op(file: &str) -> Operation {
        Operation {
            kind: OperationKind::DownloadFull,
            relative_path: file.to_string(),
            target_digest: "ABCD".to_string(),
            source_digest: None,
            url: Some(format!("http://x/{}", file)),
            patch_url: None,
            reason: "Out of date".to_string(),
            size: None,
            patch_size: None,
        }
    }

    #[tokio::test]
    async fn test_failed_downloads_keep_lock_and_log() {
        let root = TempDir::new().unwrap();
        let app_data = TempDir::new().unwrap();
        let executor = OperationExecutor::new(
            root.path(),
            app_data.path(),
            Arc::new(FailingAgent),
            BinaryPatcher::new(Arc::new(NeverTool)),
        );

        let outcome = executor
            .apply(&[download_op("a.txt"), download_op("b.txt")], &silent_sink())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, DOWNLOADS_FAILED);
        assert!(executor.session_lock().is_held());

        let pending = OperationLog::open(app_data.path().join("operations.json")).get_pending();
        let ids: Vec<&str> = pending.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["dl_0", "dl_1"]);
    }

    #[tokio::test]
    async fn test_no_ops_only_completes_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let app_data = TempDir::new().unwrap();
        let executor = OperationExecutor::new(
            root.path(),
            app_data.path(),
            Arc::new(FailingAgent),
            BinaryPatcher::new(Arc::new(NeverTool)),
        );
        let mut op = download_op("a.txt");
        op.kind = OperationKind::NoOp;

        let outcome = executor.apply(&[op], &silent_sink()).await;
        assert!(outcome.success);
        assert_eq!(outcome.message, ALL_COMPLETED);
        assert!(!executor.session_lock().is_held());
        assert!(!app_data.path().join("operations.json").exists());
    }

    #[test]
    fn test_staged_delta_location() {
        let executor = OperationExecutor::new(
            "/game",
            Path::new("/data"),
            Arc::new(FailingAgent),
            BinaryPatcher::new(Arc::new(NeverTool)),
        );
        assert_eq!(
            executor.staged_delta_path("Data/Client.package"),
            PathBuf::from("/data/staging/Data/Client.package.delta")
        );
    }
}

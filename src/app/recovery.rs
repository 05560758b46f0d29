//! Recovery after an interrupted session
//!
//! Restore (optional), then diagnose, then clear the session lock. Each step
//! gates the next. Recovery never resumes a half-applied plan; the next
//! update re-plans against whatever is on disk afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::backup::BackupManager;
use crate::app::diagnostics::{self, DiagnosticResult, Diagnostics};
use crate::app::session::SessionLock;

/// Runs the restore, diagnose, unlock sequence for one content root
pub struct RecoveryOrchestrator {
    lock: SessionLock,
    backups: BackupManager,
    diagnostics: Arc<dyn Diagnostics>,
}

impl RecoveryOrchestrator {
    pub fn new(
        content_root: impl Into<PathBuf>,
        backups: BackupManager,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let content_root = content_root.into();
        Self {
            lock: SessionLock::for_root(&content_root),
            backups,
            diagnostics,
        }
    }

    /// Recover the content root, optionally restoring `restore_point` first
    ///
    /// Returns `false` if the restore fails or the permission check fails;
    /// the session lock is kept in both cases.
    pub async fn run_recovery(&self, restore_point: Option<&str>) -> bool {
        self.run_recovery_with_report(restore_point).await.0
    }

    /// Same as [`run_recovery`](Self::run_recovery), also returning the
    /// diagnostic results (empty if the restore step failed)
    pub async fn run_recovery_with_report(
        &self,
        restore_point: Option<&str>,
    ) -> (bool, Vec<DiagnosticResult>) {
        if let Some(name) = restore_point {
            info!("Restoring {} before recovery", name);
            let backups = self.backups.clone();
            let name_owned = name.to_string();
            let restored = tokio::task::spawn_blocking(move || backups.restore(&name_owned))
                .await
                .unwrap_or(false);
            if !restored {
                error!("Recovery aborted: restore point {} could not be applied", name);
                return (false, Vec::new());
            }
        }

        let results = self.diagnostics.check_all().await;
        if diagnostics::is_fatal(&results) {
            error!("Recovery aborted: no write access to application data");
            return (false, results);
        }

        if let Err(e) = self.lock.release() {
            warn!("Could not remove session lock: {}", e);
            return (false, results);
        }
        info!("Recovery complete");
        (true, results)
    }
}

//! Binary delta application
//!
//! [`BinaryPatcher`] owns the safety protocol around an external diff-apply
//! tool: patch into a sibling temporary file, verify its digest, then swap
//! it into place. The source file is only ever replaced by output whose
//! digest matched. The tool itself sits behind the [`PatchTool`] seam.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::app::hasher::ContentHasher;
use crate::app::paths;
use crate::constants::tools;
use crate::errors::{PatchError, PatchResult};

/// External diff-apply tool
#[async_trait]
pub trait PatchTool: Send + Sync {
    /// Apply `delta` to `source`, writing the result to `output`
    ///
    /// Must never write to `source`.
    async fn apply(&self, source: &Path, delta: &Path, output: &Path) -> PatchResult<()>;

    /// Tool name for log lines
    fn name(&self) -> &str;
}

/// xdelta3 invoked as `xdelta3 -d -s <source> <delta> <output>`
#[derive(Debug, Clone)]
pub struct XdeltaTool {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl Default for XdeltaTool {
    fn default() -> Self {
        Self::new(tools::DEFAULT_XDELTA)
    }
}

impl XdeltaTool {
    /// Use the given executable (a bare name is looked up on `PATH`)
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: None,
        }
    }

    /// Abort the tool if it runs longer than `limit`
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Configured executable
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl PatchTool for XdeltaTool {
    async fn apply(&self, source: &Path, delta: &Path, output: &Path) -> PatchResult<()> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-d")
            .arg("-s")
            .arg(source)
            .arg(delta)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| PatchError::ToolSpawn {
            tool: self.executable.display().to_string(),
            reason: e.to_string(),
        })?;

        let waited = match self.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    warn!("Patch tool timed out after {:?}", limit);
                    PatchError::PatchApplicationFailed {
                        diagnostics: format!("timed out after {:?}", limit),
                    }
                })?,
            None => child.wait_with_output().await,
        };
        let output_status = waited.map_err(|e| PatchError::PatchApplicationFailed {
            diagnostics: e.to_string(),
        })?;

        debug!(
            "Patch tool finished in {:.2}s with {}",
            start.elapsed().as_secs_f32(),
            output_status.status
        );

        if output_status.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output_status.stderr)
                .trim()
                .to_string();
            let diagnostics = if stderr.is_empty() {
                format!("exit code {:?}", output_status.status.code())
            } else {
                stderr
            };
            Err(PatchError::PatchApplicationFailed { diagnostics })
        }
    }

    fn name(&self) -> &str {
        "xdelta3"
    }
}

/// Applies deltas with patch-to-temp, verify, swap
#[derive(Clone)]
pub struct BinaryPatcher {
    tool: Arc<dyn PatchTool>,
    hasher: ContentHasher,
}

impl std::fmt::Debug for BinaryPatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryPatcher")
            .field("tool", &self.tool.name())
            .finish()
    }
}

impl BinaryPatcher {
    /// Create a patcher driving the given tool
    pub fn new(tool: Arc<dyn PatchTool>) -> Self {
        Self {
            tool,
            hasher: ContentHasher::new(),
        }
    }

    /// Patch `source_path` in place using `delta_path`
    ///
    /// The tool writes to `<source>.tmp`; only output whose digest matches
    /// `target_digest` is swapped over the source. On any failure
    /// `source_path` keeps its original content and the temporary output is
    /// removed.
    ///
    /// # Arguments
    ///
    /// * `source_path` - File to patch
    /// * `delta_path` - Downloaded delta for that file
    /// * `target_digest` - Expected hex digest of the patched file
    ///
    /// # Errors
    ///
    /// * `PatchError::SourceMissing` / `PatchError::DeltaMissing` if an input is absent
    /// * `PatchError::ToolSpawn` / `PatchError::PatchApplicationFailed` if the tool fails
    /// * `PatchError::PatchVerificationFailed` if the output digest differs
    /// * `PatchError::PatchSwapFailed` if the output cannot be moved into place
    pub async fn apply_delta(
        &self,
        source_path: &Path,
        delta_path: &Path,
        target_digest: &str,
    ) -> PatchResult<()> {
        if !source_path.exists() {
            return Err(PatchError::SourceMissing {
                path: source_path.to_path_buf(),
            });
        }
        if !delta_path.exists() {
            return Err(PatchError::DeltaMissing {
                path: delta_path.to_path_buf(),
            });
        }

        let temp_path = paths::temp_path(source_path);
        if temp_path.exists() {
            debug!("Removing stale patch output {}", temp_path.display());
            let _ = tokio::fs::remove_file(&temp_path).await;
        }

        info!(
            "Applying {} patch to {}",
            self.tool.name(),
            source_path.display()
        );
        if let Err(e) = self.tool.apply(source_path, delta_path, &temp_path).await {
            error!("Patch tool failed for {}: {}", source_path.display(), e);
            remove_if_present(&temp_path).await;
            return Err(e);
        }

        let digest = match self.hasher.hash(&temp_path).await {
            Ok(digest) => digest,
            Err(e) => {
                remove_if_present(&temp_path).await;
                return Err(PatchError::Hash(e));
            }
        };

        if !digest.matches(target_digest) {
            error!(
                "Patched output for {} has digest {}, expected {}",
                source_path.display(),
                digest,
                target_digest
            );
            remove_if_present(&temp_path).await;
            return Err(PatchError::PatchVerificationFailed {
                path: source_path.to_path_buf(),
                expected: target_digest.to_uppercase(),
                actual: digest.to_hex(),
            });
        }

        swap_into_place(&temp_path, source_path).await?;
        info!("Patched {}", source_path.display());
        Ok(())
    }
}

/// Replace `target` with `temp_path`
///
/// The original is renamed aside to `<target>.bak` first, so at every point
/// either the original or its replacement exists under a known name.
async fn swap_into_place(temp_path: &Path, target: &Path) -> PatchResult<()> {
    let held = paths::backup_path(target);
    if held.exists() {
        warn!("Replacing leftover {} before swap", held.display());
        remove_if_present(&held).await;
    }

    let swap_failed = |reason: String| PatchError::PatchSwapFailed {
        temp_path: temp_path.to_path_buf(),
        target: target.to_path_buf(),
        reason,
    };

    if let Err(e) = tokio::fs::rename(target, &held).await {
        remove_if_present(temp_path).await;
        return Err(swap_failed(e.to_string()));
    }

    if let Err(e) = tokio::fs::rename(temp_path, target).await {
        if let Err(restore) = tokio::fs::rename(&held, target).await {
            error!(
                "Could not restore {} from {}: {}",
                target.display(),
                held.display(),
                restore
            );
        }
        remove_if_present(temp_path).await;
        return Err(swap_failed(e.to_string()));
    }

    if let Err(e) = tokio::fs::remove_file(&held).await {
        warn!("Could not remove {}: {}", held.display(), e);
    }
    Ok(())
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::hash::Digest;
    use tempfile::TempDir;

    /// Treats the delta file as the complete target content
    struct CopyTool;

    #[async_trait]
    impl PatchTool for CopyTool {
        async fn apply(&self, _source: &Path, delta: &Path, output: &Path) -> PatchResult<()> {
            tokio::fs::copy(delta, output)
                .await
                .map(|_| ())
                .map_err(|e| PatchError::PatchApplicationFailed {
                    diagnostics: e.to_string(),
                })
        }

        fn name(&self) -> &str {
            "copy"
        }
    }

    /// Writes partial output then fails
    struct BrokenTool;

    #[async_trait]
    impl PatchTool for BrokenTool {
        async fn apply(&self, _source: &Path, _delta: &Path, output: &Path) -> PatchResult<()> {
            let _ = tokio::fs::write(output, b"partial").await;
            Err(PatchError::PatchApplicationFailed {
                diagnostics: "xdelta3: target window checksum mismatch".to_string(),
            })
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn fixture(dir: &TempDir) -> (PathBuf, PathBuf) {
        let source = dir.path().join("Client.package");
        let delta = dir.path().join("Client.package.delta");
        std::fs::write(&source, b"old content").unwrap();
        std::fs::write(&delta, b"new content").unwrap();
        (source, delta)
    }

    #[tokio::test]
    async fn test_successful_patch_replaces_source() {
        let dir = TempDir::new().unwrap();
        let (source, delta) = fixture(&dir);
        let expected = Digest::of_bytes(b"new content").to_hex();

        let patcher = BinaryPatcher::new(Arc::new(CopyTool));
        patcher.apply_delta(&source, &delta, &expected).await.unwrap();

        assert_eq!(std::fs::read(&source).unwrap(), b"new content");
        assert!(!paths::temp_path(&source).exists());
        assert!(!paths::backup_path(&source).exists());
    }

    #[tokio::test]
    async fn test_verification_failure_leaves_source_untouched() {
        let dir = TempDir::new().unwrap();
        let (source, delta) = fixture(&dir);
        let wrong = Digest::of_bytes(b"something else").to_hex();

        let patcher = BinaryPatcher::new(Arc::new(CopyTool));
        let result = patcher.apply_delta(&source, &delta, &wrong).await;

        assert!(matches!(
            result,
            Err(PatchError::PatchVerificationFailed { .. })
        ));
        assert_eq!(std::fs::read(&source).unwrap(), b"old content");
        assert!(!paths::temp_path(&source).exists());
    }

    #[tokio::test]
    async fn test_tool_failure_cleans_temp_and_reports_diagnostics() {
        let dir = TempDir::new().unwrap();
        let (source, delta) = fixture(&dir);

        let patcher = BinaryPatcher::new(Arc::new(BrokenTool));
        let result = patcher.apply_delta(&source, &delta, "ABCD").await;

        match result {
            Err(PatchError::PatchApplicationFailed { diagnostics }) => {
                assert!(diagnostics.contains("checksum mismatch"));
            }
            other => panic!("Expected PatchApplicationFailed, got {:?}", other),
        }
        assert_eq!(std::fs::read(&source).unwrap(), b"old content");
        assert!(!paths::temp_path(&source).exists());
    }

    #[tokio::test]
    async fn test_swap_failure_keeps_source_and_removes_temp() {
        let dir = TempDir::new().unwrap();
        let (source, delta) = fixture(&dir);
        let expected = Digest::of_bytes(b"new content").to_hex();

        // A non-empty directory where the original would be held aside
        let held = paths::backup_path(&source);
        std::fs::create_dir_all(&held).unwrap();
        std::fs::write(held.join("keep"), b"x").unwrap();

        let patcher = BinaryPatcher::new(Arc::new(CopyTool));
        let result = patcher.apply_delta(&source, &delta, &expected).await;

        assert!(matches!(result, Err(PatchError::PatchSwapFailed { .. })));
        assert_eq!(std::fs::read(&source).unwrap(), b"old content");
        assert!(!paths::temp_path(&source).exists());
    }

    #[tokio::test]
    async fn test_missing_inputs() {
        let dir = TempDir::new().unwrap();
        let patcher = BinaryPatcher::new(Arc::new(CopyTool));

        let result = patcher
            .apply_delta(&dir.path().join("nope"), &dir.path().join("d"), "A")
            .await;
        assert!(matches!(result, Err(PatchError::SourceMissing { .. })));

        let (source, _) = fixture(&dir);
        let result = patcher
            .apply_delta(&source, &dir.path().join("missing.delta"), "A")
            .await;
        assert!(matches!(result, Err(PatchError::DeltaMissing { .. })));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let (source, delta) = fixture(&dir);
        let tool = XdeltaTool::new(dir.path().join("no-such-xdelta"));

        let patcher = BinaryPatcher::new(Arc::new(tool));
        let result = patcher.apply_delta(&source, &delta, "A").await;
        assert!(matches!(result, Err(PatchError::ToolSpawn { .. })));
        assert_eq!(std::fs::read(&source).unwrap(), b"old content");
    }
}

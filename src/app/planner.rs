//! Operation plan builder
//!
//! Diffs a manifest against the files on disk and produces one
//! [`Operation`] per selected entry, in manifest order. Planning either
//! yields a complete plan or a typed error; it never returns a partial plan.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::app::hash::Digest;
use crate::app::hasher::ContentHasher;
use crate::app::manifest::{Category, EntryKind, Manifest, ManifestSource, PatchEntry};
use crate::app::operation::{
    Operation, OperationKind, ProgressEvent, ProgressSink, REASON_OUT_OF_DATE,
    REASON_SOURCE_MISMATCH,
};
use crate::app::resolver::UrlResolver;
use crate::app::paths;
use crate::constants::packs;
use crate::errors::{HashError, PlanError, PlanResult};

/// What to plan for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Selected packs; `None` selects every pack the manifest references
    pub selected_packs: Option<BTreeSet<String>>,
    /// Language code kept when filtering language entries
    pub language: String,
    /// Pin the manifest to a version instead of fetching the latest
    pub target_version: Option<String>,
}

impl Default for PlanRequest {
    fn default() -> Self {
        Self {
            selected_packs: None,
            language: packs::DEFAULT_LANGUAGE.to_string(),
            target_version: None,
        }
    }
}

/// Builds operation plans for one content root
#[derive(Clone)]
pub struct OperationPlanner {
    content_root: PathBuf,
    hasher: ContentHasher,
    resolver: Arc<dyn UrlResolver>,
}

impl OperationPlanner {
    /// Create a planner for `content_root`
    pub fn new(
        content_root: impl Into<PathBuf>,
        hasher: ContentHasher,
        resolver: Arc<dyn UrlResolver>,
    ) -> Self {
        Self {
            content_root: content_root.into(),
            hasher,
            resolver,
        }
    }

    /// Content root this planner diffs against
    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// Fetch the manifest from `source` and plan against it
    ///
    /// Failures are reported both as the returned error and as a
    /// `ProgressEvent::Error` on `progress`.
    pub async fn plan_from_source(
        &self,
        source: &dyn ManifestSource,
        request: &PlanRequest,
        progress: &ProgressSink,
    ) -> PlanResult<Vec<Operation>> {
        progress(ProgressEvent::FetchingManifest);

        let manifest = match source
            .fetch_manifest(request.target_version.as_deref())
            .await
        {
            Ok(manifest) => manifest,
            Err(e) => {
                error!("Failed to load manifest from {}: {}", source.describe(), e);
                progress(ProgressEvent::Error {
                    message: e.to_string(),
                });
                return Err(PlanError::Manifest(e));
            }
        };

        self.plan(&manifest, request, progress).await.map_err(|e| {
            progress(ProgressEvent::Error {
                message: e.to_string(),
            });
            e
        })
    }

    /// Plan against an already-parsed manifest
    ///
    /// Produces one operation per manifest entry that survives pack and
    /// language filtering, in manifest order. Local files are hashed but
    /// never modified, so planning the same tree twice gives the same plan.
    ///
    /// # Arguments
    ///
    /// * `manifest` - Target state
    /// * `request` - Selected packs (closed over the manifest's dependencies) and language
    /// * `progress` - Receives a `Hashing` event per local file
    ///
    /// # Errors
    ///
    /// * `PlanError::Hash` if an existing local file cannot be read
    /// * `PlanError::Resolve` if a download reference cannot be resolved
    /// * `PlanError::Unplannable` if an out-of-date entry carries no usable URL
    pub async fn plan(
        &self,
        manifest: &Manifest,
        request: &PlanRequest,
        progress: &ProgressSink,
    ) -> PlanResult<Vec<Operation>> {
        let selection = final_selection(manifest, request.selected_packs.as_ref());
        let entries = filter_entries(manifest, &selection, &request.language);
        info!(
            "Planning {} of {} manifest entries ({} packs selected)",
            entries.len(),
            manifest.files().len(),
            selection.len()
        );

        let local = self.local_digests(&entries, progress).await?;

        let mut operations = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = paths::content_path(&self.content_root, &entry.relative_path);
            let current = local.get(&path);
            operations.push(self.classify(entry, current).await?);
        }

        debug!(
            "Plan: {} downloads, {} patches, {} up to date",
            count(&operations, OperationKind::DownloadFull),
            count(&operations, OperationKind::PatchDelta),
            count(&operations, OperationKind::NoOp)
        );
        Ok(operations)
    }

    /// Digests of the entries' files that currently exist
    ///
    /// Unreadable files are treated as having no local digest, except for
    /// permission failures which abort planning.
    async fn local_digests(
        &self,
        entries: &[&PatchEntry],
        progress: &ProgressSink,
    ) -> PlanResult<HashMap<PathBuf, Digest>> {
        let existing: Vec<PathBuf> = entries
            .iter()
            .map(|e| paths::content_path(&self.content_root, &e.relative_path))
            .filter(|p| p.is_file())
            .collect();

        let results = self
            .hasher
            .hash_many(&existing, |current, total, path| {
                progress(ProgressEvent::Hashing {
                    current,
                    total,
                    file: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                });
            })
            .await;

        let mut digests = HashMap::with_capacity(results.len());
        for (path, result) in results {
            match result {
                Ok(digest) => {
                    digests.insert(path, digest);
                }
                Err(e @ HashError::PermissionDenied { .. }) => return Err(PlanError::Hash(e)),
                Err(e) => warn!("Treating {} as missing: {}", path.display(), e),
            }
        }
        Ok(digests)
    }

    async fn classify(
        &self,
        entry: &PatchEntry,
        current: Option<&Digest>,
    ) -> PlanResult<Operation> {
        if current.is_some_and(|d| d.matches(&entry.target_digest)) {
            return Ok(Operation::no_op(entry));
        }

        match entry.kind {
            EntryKind::Full => {
                let url = self.resolve_full(entry).await?;
                Ok(Operation::download_full(entry, url, REASON_OUT_OF_DATE))
            }
            EntryKind::Delta => {
                let source_matches = match (current, entry.source_digest.as_deref()) {
                    (Some(local), Some(source)) => local.matches(source),
                    _ => false,
                };

                if source_matches {
                    let reference = entry.patch_url.as_deref().ok_or_else(|| {
                        PlanError::Unplannable {
                            file: entry.relative_path.clone(),
                            reason: "delta entry without patch_url".to_string(),
                        }
                    })?;
                    let patch_url = self.resolver.resolve(reference).await?;
                    Ok(Operation::patch_delta(entry, patch_url))
                } else {
                    debug!(
                        "{}: local digest does not match delta source",
                        entry.relative_path
                    );
                    let url = self.resolve_full(entry).await?;
                    Ok(Operation::download_full(entry, url, REASON_SOURCE_MISMATCH))
                }
            }
        }
    }

    async fn resolve_full(&self, entry: &PatchEntry) -> PlanResult<String> {
        let reference = entry
            .url
            .as_deref()
            .ok_or_else(|| PlanError::Unplannable {
                file: entry.relative_path.clone(),
                reason: "no full download url".to_string(),
            })?;
        Ok(self.resolver.resolve(reference).await?)
    }
}

/// Selected packs plus `Base`, closed over the manifest's dependencies
pub fn final_selection(
    manifest: &Manifest,
    selected: Option<&BTreeSet<String>>,
) -> BTreeSet<String> {
    let effective: BTreeSet<String> = match selected {
        Some(selected) => selected.clone(),
        None => manifest.available_packs(),
    };
    manifest
        .dependency_graph()
        .resolve_with_base(effective)
        .into_iter()
        .collect()
}

/// Entries in manifest order that survive pack and language filtering
pub fn filter_entries<'a>(
    manifest: &'a Manifest,
    selection: &BTreeSet<String>,
    language: &str,
) -> Vec<&'a PatchEntry> {
    manifest
        .files()
        .iter()
        .filter(|e| selection.contains(&e.pack_id))
        .filter(|e| {
            e.category != Category::Language
                || e.language.as_deref().map_or(true, |code| code == language)
        })
        .collect()
}

fn count(operations: &[Operation], kind: OperationKind) -> usize {
    operations.iter().filter(|o| o.kind == kind).count()
}

/// Byte totals for a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceEstimate {
    pub download_size: u64,
    pub install_size: u64,
}

/// Disk space estimation from manifest-published sizes
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceCalculator;

impl SpaceCalculator {
    /// Sum the sizes a plan will download and install
    ///
    /// Deltas without a published size are assumed to be a tenth of the
    /// target file.
    pub fn estimate(operations: &[Operation]) -> SpaceEstimate {
        operations
            .iter()
            .fold(SpaceEstimate::default(), |mut total, op| {
                let size = op.size.unwrap_or(0);
                match op.kind {
                    OperationKind::NoOp => {}
                    OperationKind::DownloadFull => {
                        total.download_size += size;
                        total.install_size += size;
                    }
                    OperationKind::PatchDelta => {
                        total.download_size += op.patch_size.unwrap_or(size / 10);
                        total.install_size += size;
                    }
                }
                total
            })
    }

    /// Free bytes on the filesystem holding `path`
    pub fn free_space(path: &Path) -> std::io::Result<u64> {
        fs2::available_space(path)
    }

    /// Whether more than `required_bytes` are free at `path`
    pub fn has_enough_space(path: &Path, required_bytes: u64) -> std::io::Result<bool> {
        Ok(Self::free_space(path)? > required_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::manifest::parse_manifest;
    use crate::app::operation::silent_sink;
    use crate::app::resolver::PassthroughResolver;
    use tempfile::TempDir;

    fn planner(root: &Path) -> OperationPlanner {
        OperationPlanner::new(
            root,
            ContentHasher::with_workers(2),
            Arc::new(PassthroughResolver::default()),
        )
    }

    #[test]
    fn test_final_selection_includes_base_and_deps() {
        let manifest = parse_manifest(
            r#"{"dependencies":{"GP01":["EP01"],"EP01":["Base"],"SP01":["Base"]},"files":[]}"#,
        )
        .unwrap();
        let selected: BTreeSet<String> = ["GP01".to_string()].into_iter().collect();
        let selection = final_selection(&manifest, Some(&selected));
        let names: Vec<&str> = selection.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["Base", "EP01", "GP01"]);
    }

    #[test]
    fn test_language_filter_keeps_unlabelled_entries() {
        let manifest = parse_manifest(
            r#"{"files":[
                {"name":"a","MD5_to":"A","type":"full","url":"u","category":"Language","language":"en_US"},
                {"name":"b","MD5_to":"B","type":"full","url":"u","category":"Language","language":"fr_FR"},
                {"name":"c","MD5_to":"C","type":"full","url":"u","category":"Language"}
            ]}"#,
        )
        .unwrap();
        let selection = final_selection(&manifest, None);
        let kept: Vec<&str> = filter_entries(&manifest, &selection, "en_US")
            .into_iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(kept, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_missing_file_plans_full_download() {
        let root = TempDir::new().unwrap();
        let manifest = parse_manifest(
            r#"{"files":[{"name":"f.txt","MD5_to":"ABCD","type":"full","url":"http://x/f.txt"}]}"#,
        )
        .unwrap();

        let plan = planner(root.path())
            .plan(&manifest, &PlanRequest::default(), &silent_sink())
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, OperationKind::DownloadFull);
        assert_eq!(plan[0].relative_path, "f.txt");
        assert_eq!(plan[0].target_digest, "ABCD");
        assert_eq!(plan[0].url.as_deref(), Some("http://x/f.txt"));
    }

    #[tokio::test]
    async fn test_delta_without_url_cannot_fall_back() {
        let root = TempDir::new().unwrap();
        let manifest = parse_manifest(
            r#"{"files":[{"name":"f","MD5_to":"AA","type":"delta","MD5_from":"BB","patch_url":"http://x/p"}]}"#,
        )
        .unwrap();

        let result = planner(root.path())
            .plan(&manifest, &PlanRequest::default(), &silent_sink())
            .await;
        assert!(matches!(result, Err(PlanError::Unplannable { .. })));
    }

    #[test]
    fn test_space_estimate() {
        let manifest = parse_manifest(
            r#"{"files":[
                {"name":"a","MD5_to":"A","type":"full","url":"http://x/a","size":1000},
                {"name":"b","MD5_to":"B","type":"delta","MD5_from":"C","patch_url":"http://x/b","size":500}
            ]}"#,
        )
        .unwrap();
        let entries = manifest.files();
        let ops = vec![
            Operation::download_full(&entries[0], "http://x/a".to_string(), REASON_OUT_OF_DATE),
            Operation::patch_delta(&entries[1], "http://x/b".to_string()),
            Operation::no_op(&entries[0]),
        ];

        let estimate = SpaceCalculator::estimate(&ops);
        assert_eq!(estimate.download_size, 1050);
        assert_eq!(estimate.install_size, 1500);
    }

    #[test]
    fn test_free_space_queries() {
        let dir = TempDir::new().unwrap();
        assert!(SpaceCalculator::free_space(dir.path()).is_ok());
        assert!(!SpaceCalculator::has_enough_space(dir.path(), u64::MAX).unwrap());
    }
}

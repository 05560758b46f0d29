//! Update manager
//!
//! The single entry point the CLI and the sidecar transport call into. Each
//! method is a direct call into one component; the manager only owns the
//! wiring between them for one content root.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::app::backup::BackupManager;
use crate::app::client::{self, HttpHandler};
use crate::app::dependency::DependencyGraph;
use crate::app::diagnostics::{DiagnosticResult, Diagnostics, Doctor};
use crate::app::download::{Aria2Agent, DownloadAgent, HttpAgent};
use crate::app::executor::{ExecutionOutcome, OperationExecutor};
use crate::app::hash::Digest;
use crate::app::hasher::ContentHasher;
use crate::app::manifest::{
    FileManifestSource, HttpManifestSource, ManifestSource, PackStatus, Version, VersionScanner,
};
use crate::app::oplog::PendingOperation;
use crate::app::operation::{Operation, ProgressSink};
use crate::app::patcher::{BinaryPatcher, PatchTool, XdeltaTool};
use crate::app::planner::{OperationPlanner, PlanRequest};
use crate::app::recovery::RecoveryOrchestrator;
use crate::app::resolver::{
    HttpRedirectResolver, Mirror, MirrorContext, MirrorDiscovery, MirrorProbe, PassthroughResolver,
    UrlResolver,
};
use crate::app::session::SessionLock;
use crate::config::{DownloadAgentKind, RuntimeConfig};
use crate::constants::{packs, tools};
use crate::errors::{
    ConfigError, DownloadError, HashResult, ManifestError, PlanError, PlanResult, Result,
};

/// Update operations for one content root
pub struct UpdateManager {
    content_root: PathBuf,
    app_data_dir: PathBuf,
    language: String,
    source: Option<Arc<dyn ManifestSource>>,
    http: Option<Arc<HttpHandler>>,
    hasher: ContentHasher,
    planner: OperationPlanner,
    executor: OperationExecutor,
    backups: BackupManager,
    recovery: RecoveryOrchestrator,
}

impl std::fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManager")
            .field("content_root", &self.content_root)
            .field("app_data_dir", &self.app_data_dir)
            .field("language", &self.language)
            .field("source", &self.source.as_ref().map(|s| s.describe()))
            .finish()
    }
}

impl UpdateManager {
    /// Start building a manager with injectable components
    pub fn builder(
        content_root: impl Into<PathBuf>,
        app_data_dir: impl Into<PathBuf>,
    ) -> UpdateManagerBuilder {
        UpdateManagerBuilder::new(content_root.into(), app_data_dir.into())
    }

    /// Wire a manager from runtime configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Resolved runtime configuration; `manifest_url` may be a
    ///   local path or an HTTP(S) URL
    /// * `content_root` - Installation directory to update
    ///
    /// # Errors
    ///
    /// Returns `AppError::Download` if the HTTP client cannot be built, the
    /// configured mirror is not a URL, or the aria2c agent cannot be created
    pub fn from_config(config: &RuntimeConfig, content_root: impl Into<PathBuf>) -> Result<Self> {
        let handler = Arc::new(client::build_handler(&config.client)?);

        let mirror = match &config.mirror {
            Some(text) => MirrorContext::with_mirror(Url::parse(text).map_err(|e| {
                DownloadError::InvalidUrl {
                    url: text.clone(),
                    error: e.to_string(),
                }
            })?),
            None => MirrorContext::none(),
        };
        let resolver: Arc<dyn UrlResolver> = if config.resolve_redirects {
            Arc::new(HttpRedirectResolver::new(&config.client, mirror)?)
        } else {
            Arc::new(PassthroughResolver::new(mirror))
        };

        let agent: Arc<dyn DownloadAgent> = match config.download_agent {
            DownloadAgentKind::Aria2 => Arc::new(Aria2Agent::new(&config.aria2_path)?),
            DownloadAgentKind::Http => Arc::new(HttpAgent::new(Arc::clone(&handler))),
        };

        let mut tool = XdeltaTool::new(&config.xdelta_path);
        if let Some(limit) = config.patch_timeout {
            tool = tool.with_timeout(limit);
        }

        let doctor = Doctor::new(&config.app_data_dir, handler.client().clone())
            .with_tools(&config.xdelta_path, &config.aria2_path);

        let mut builder = Self::builder(content_root, &config.app_data_dir)
            .with_language(&config.default_language)
            .with_resolver(resolver)
            .with_download_agent(agent)
            .with_patch_tool(Arc::new(tool))
            .with_diagnostics(Arc::new(doctor))
            .with_hash_workers(config.hash_workers)
            .with_download_concurrency(config.download_concurrency)
            .with_backup_prefix(&config.backup_prefix)
            .with_http_handler(Arc::clone(&handler));

        if let Some(reference) = &config.manifest_url {
            let source: Arc<dyn ManifestSource> = if is_remote(reference) {
                Arc::new(
                    HttpManifestSource::new(handler, reference.clone())
                        .with_timeout(config.client.manifest_timeout),
                )
            } else {
                Arc::new(FileManifestSource::new(reference))
            };
            builder = builder.with_manifest_source(source);
        }
        builder.build()
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn app_data_dir(&self) -> &Path {
        &self.app_data_dir
    }

    /// Plan request using this manager's default language
    pub fn plan_request(
        &self,
        selected_packs: Option<BTreeSet<String>>,
        target_version: Option<String>,
    ) -> PlanRequest {
        PlanRequest {
            selected_packs,
            language: self.language.clone(),
            target_version,
        }
    }

    /// Fetch the manifest and plan operations for the content root
    pub async fn plan(
        &self,
        request: &PlanRequest,
        progress: &ProgressSink,
    ) -> PlanResult<Vec<Operation>> {
        let source = self.source.as_ref().ok_or_else(|| {
            PlanError::Manifest(ManifestError::InvalidUrl {
                url: String::new(),
                error: "no manifest source configured".to_string(),
            })
        })?;
        self.planner
            .plan_from_source(source.as_ref(), request, progress)
            .await
    }

    /// Apply a plan
    pub async fn apply(&self, operations: &[Operation], progress: &ProgressSink) -> ExecutionOutcome {
        self.executor.apply(operations, progress).await
    }

    /// Whether a previous session against this root did not finish
    pub fn check_interrupted(&self) -> bool {
        SessionLock::for_root(&self.content_root).is_held()
    }

    /// Operations logged but not completed by the last session
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.executor
            .with_log(|log| Ok(log.get_pending()))
            .unwrap_or_default()
    }

    /// Restore (optionally), diagnose and clear the interrupted marker
    pub async fn run_recovery(&self, restore_point: Option<&str>) -> bool {
        self.recovery.run_recovery(restore_point).await
    }

    /// [`run_recovery`](Self::run_recovery) plus the diagnostic results
    pub async fn run_recovery_with_report(
        &self,
        restore_point: Option<&str>,
    ) -> (bool, Vec<DiagnosticResult>) {
        self.recovery.run_recovery_with_report(restore_point).await
    }

    /// Close `selected` over `dependencies`
    pub fn resolve_dependencies<S: AsRef<str>>(
        selected: &[S],
        dependencies: &BTreeMap<String, Vec<String>>,
    ) -> BTreeSet<String> {
        DependencyGraph::from_map(dependencies)
            .resolve(selected.iter().map(|s| s.as_ref()))
            .into_iter()
            .collect()
    }

    /// Digest of one file
    pub async fn hash_file(&self, path: &Path) -> HashResult<Digest> {
        self.hasher.hash(path).await
    }

    /// Archive the given files under the content root
    pub async fn create_backup(&self, relative_paths: Vec<String>) -> Option<String> {
        let backups = self.backups.clone();
        tokio::task::spawn_blocking(move || backups.create_restore_point(&relative_paths))
            .await
            .unwrap_or(None)
    }

    pub fn list_backups(&self) -> Vec<String> {
        self.backups.list_restore_points()
    }

    /// Extract a restore point over the content root
    pub async fn restore_backup(&self, restore_point: &str) -> bool {
        let backups = self.backups.clone();
        let restore_point = restore_point.to_string();
        tokio::task::spawn_blocking(move || backups.restore(&restore_point))
            .await
            .unwrap_or(false)
    }

    /// Install state of each optional pack named by the manifest
    ///
    /// # Errors
    ///
    /// Returns `AppError::Manifest` if no manifest source is configured or
    /// the manifest cannot be fetched or parsed
    pub async fn pack_status(&self, version: Option<&str>) -> Result<Vec<PackStatus>> {
        let source = self.source.as_ref().ok_or_else(|| ManifestError::InvalidUrl {
            url: String::new(),
            error: "no manifest source configured".to_string(),
        })?;
        let manifest = source.fetch_manifest(version).await?;
        Ok(manifest.pack_status(&self.content_root))
    }

    /// Probe candidate mirrors, best first
    pub async fn discover_mirrors(&self, mirrors: &[Mirror]) -> Result<Vec<MirrorProbe>> {
        Ok(MirrorDiscovery::new(self.http_handler()?)
            .discover(mirrors)
            .await)
    }

    fn http_handler(&self) -> Result<Arc<HttpHandler>> {
        match &self.http {
            Some(handler) => Ok(Arc::clone(handler)),
            None => Ok(Arc::new(client::build_handler(&Default::default())?)),
        }
    }

    /// Versions linked from an index page, newest first
    pub async fn discover_versions(&self, index_url: &str) -> Result<Vec<Version>> {
        Ok(VersionScanner::new(self.http_handler()?)
            .scan(index_url)
            .await?)
    }
}

/// Whether a manifest reference names an HTTP(S) URL rather than a local file
pub fn is_remote(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Builder for [`UpdateManager`]; unset components get their defaults
pub struct UpdateManagerBuilder {
    content_root: PathBuf,
    app_data_dir: PathBuf,
    language: String,
    source: Option<Arc<dyn ManifestSource>>,
    resolver: Option<Arc<dyn UrlResolver>>,
    agent: Option<Arc<dyn DownloadAgent>>,
    tool: Option<Arc<dyn PatchTool>>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    http: Option<Arc<HttpHandler>>,
    hash_workers: usize,
    download_concurrency: usize,
    backup_prefix: Option<String>,
}

impl UpdateManagerBuilder {
    fn new(content_root: PathBuf, app_data_dir: PathBuf) -> Self {
        Self {
            content_root,
            app_data_dir,
            language: packs::DEFAULT_LANGUAGE.to_string(),
            source: None,
            resolver: None,
            agent: None,
            tool: None,
            diagnostics: None,
            http: None,
            hash_workers: 0,
            download_concurrency: 1,
            backup_prefix: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_manifest_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_download_agent(mut self, agent: Arc<dyn DownloadAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_patch_tool(mut self, tool: Arc<dyn PatchTool>) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_http_handler(mut self, handler: Arc<HttpHandler>) -> Self {
        self.http = Some(handler);
        self
    }

    /// Hashing workers (0 = available CPU parallelism)
    pub fn with_hash_workers(mut self, workers: usize) -> Self {
        self.hash_workers = workers;
        self
    }

    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency;
        self
    }

    pub fn with_backup_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.backup_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Result<UpdateManager> {
        if self.content_root.as_os_str().is_empty() {
            return Err(ConfigError::DirectoryUnavailable {
                what: "content root".to_string(),
            }
            .into());
        }

        let agent = match self.agent {
            Some(agent) => agent,
            None => Arc::new(Aria2Agent::new(tools::DEFAULT_ARIA2)?),
        };
        let tool = self
            .tool
            .unwrap_or_else(|| Arc::new(XdeltaTool::new(tools::DEFAULT_XDELTA)));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(PassthroughResolver::default()));
        let diagnostics: Arc<dyn Diagnostics> = match self.diagnostics {
            Some(diagnostics) => diagnostics,
            None => {
                let client = match &self.http {
                    Some(handler) => handler.client().clone(),
                    None => Default::default(),
                };
                Arc::new(Doctor::new(&self.app_data_dir, client))
            }
        };

        let hasher = ContentHasher::with_workers(self.hash_workers);
        let mut backups = BackupManager::new(&self.content_root, &self.app_data_dir);
        if let Some(prefix) = self.backup_prefix {
            backups = backups.with_prefix(prefix);
        }

        debug!(
            "Update manager for {} (data in {})",
            self.content_root.display(),
            self.app_data_dir.display()
        );

        Ok(UpdateManager {
            planner: OperationPlanner::new(&self.content_root, hasher.clone(), resolver),
            executor: OperationExecutor::new(
                &self.content_root,
                &self.app_data_dir,
                agent,
                BinaryPatcher::new(tool),
            )
            .with_download_concurrency(self.download_concurrency),
            recovery: RecoveryOrchestrator::new(&self.content_root, backups.clone(), diagnostics),
            backups,
            hasher,
            source: self.source,
            http: self.http,
            language: self.language,
            content_root: self.content_root,
            app_data_dir: self.app_data_dir,
        })
    }
}

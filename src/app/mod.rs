//! Core update engine
//!
//! This module contains the update components: content hashing, the typed
//! manifest model, dependency and URL resolution, planning, execution with
//! its durable session state, binary patching, restore points and recovery.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use content_updater::app::{silent_sink, FileManifestSource, UpdateManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = UpdateManager::builder("/games/install", "/tmp/updater-data")
//!     .with_manifest_source(Arc::new(FileManifestSource::new("manifest.json")))
//!     .build()?;
//!
//! if manager.check_interrupted() {
//!     manager.run_recovery(None).await;
//! }
//!
//! let progress = silent_sink();
//! let request = manager.plan_request(None, None);
//! let operations = manager.plan(&request, &progress).await?;
//! let outcome = manager.apply(&operations, &progress).await;
//! println!("{}", outcome.message);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod client;
pub mod dependency;
pub mod diagnostics;
pub mod download;
pub mod executor;
pub mod hash;
pub mod hasher;
pub mod manifest;
pub mod operation;
pub mod oplog;
pub mod patcher;
pub mod paths;
pub mod planner;
pub mod recovery;
pub mod resolver;
pub mod session;
pub mod updater;

// Re-export main public API
pub use backup::BackupManager;
pub use client::{ClientConfig, HttpHandler};
pub use dependency::DependencyGraph;
pub use diagnostics::{DiagnosticResult, DiagnosticStatus, Diagnostics, Doctor};
pub use download::{Aria2Agent, DownloadAgent, DownloadQueue, DownloadTask, HttpAgent};
pub use executor::{ExecutionOutcome, OperationExecutor};
pub use hash::Digest;
pub use hasher::ContentHasher;
pub use manifest::{
    Category, EntryKind, FileManifestSource, PackState, PackStatus, HttpManifestSource, Manifest, ManifestSource,
    PatchEntry, StaticManifestSource, Version, VersionScanner,
};
pub use operation::{silent_sink, Operation, OperationKind, ProgressEvent, ProgressSink};
pub use oplog::{OperationLog, OperationStatus, PendingOperation};
pub use patcher::{BinaryPatcher, PatchTool, XdeltaTool};
pub use planner::{OperationPlanner, PlanRequest, SpaceCalculator, SpaceEstimate};
pub use recovery::RecoveryOrchestrator;
pub use resolver::{
    HttpRedirectResolver, Mirror, MirrorContext, MirrorDiscovery, MirrorProbe, PassthroughResolver,
    UrlResolver,
};
pub use session::SessionLock;
pub use updater::{UpdateManager, UpdateManagerBuilder};

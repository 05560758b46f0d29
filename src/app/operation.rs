//! Planned operations and progress events
//!
//! Both types serialize to the JSON shapes the process-control transport
//! sends to its caller, so their serde attributes are part of the wire
//! format.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::manifest::PatchEntry;

/// What the executor has to do for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// File is already at its target digest
    #[serde(rename = "nothing")]
    NoOp,
    /// Download the complete target file
    #[serde(rename = "download_full")]
    DownloadFull,
    /// Apply a binary delta to the local file
    #[serde(rename = "patch_delta")]
    PatchDelta,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::NoOp => "no-op",
            OperationKind::DownloadFull => "download-full",
            OperationKind::PatchDelta => "patch-delta",
        };
        f.write_str(name)
    }
}

/// Reason attached to up-to-date files
pub const REASON_UP_TO_DATE: &str = "Up to date";
/// Reason attached to out-of-date full entries
pub const REASON_OUT_OF_DATE: &str = "Out of date";
/// Reason attached to deltas whose source is present
pub const REASON_DELTA_AVAILABLE: &str = "Source matches delta";
/// Reason attached to delta entries that fell back to a full download
pub const REASON_SOURCE_MISMATCH: &str = "Source hash mismatch for delta";

/// One planned action for a single managed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(rename = "file")]
    pub relative_path: String,
    #[serde(rename = "target_md5")]
    pub target_digest: String,
    #[serde(rename = "source_md5", default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_url: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_size: Option<u64>,
}

impl Operation {
    /// Nothing to do for this entry
    pub fn no_op(entry: &PatchEntry) -> Self {
        Self::base(entry, OperationKind::NoOp, REASON_UP_TO_DATE)
    }

    /// Fetch the whole file from `url`
    pub fn download_full(entry: &PatchEntry, url: String, reason: &str) -> Self {
        Self {
            url: Some(url),
            ..Self::base(entry, OperationKind::DownloadFull, reason)
        }
    }

    /// Patch the local file with the delta at `patch_url`
    pub fn patch_delta(entry: &PatchEntry, patch_url: String) -> Self {
        Self {
            source_digest: entry.source_digest.clone(),
            patch_url: Some(patch_url),
            ..Self::base(entry, OperationKind::PatchDelta, REASON_DELTA_AVAILABLE)
        }
    }

    fn base(entry: &PatchEntry, kind: OperationKind, reason: &str) -> Self {
        Self {
            kind,
            relative_path: entry.relative_path.clone(),
            target_digest: entry.target_digest.clone(),
            source_digest: None,
            url: None,
            patch_url: None,
            reason: reason.to_string(),
            size: entry.size,
            patch_size: entry.patch_size,
        }
    }

    /// Whether the executor has any work to do for this operation
    pub fn is_actionable(&self) -> bool {
        self.kind != OperationKind::NoOp
    }
}

/// Progress notification emitted by the planner and executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    FetchingManifest,
    Hashing {
        current: usize,
        total: usize,
        file: String,
    },
    Downloading {
        percentage: u8,
        speed: String,
        eta: String,
    },
    Patching {
        current: usize,
        total: usize,
        file: String,
    },
    ApplyingUpdates,
    Error {
        message: String,
    },
    Complete {
        message: String,
    },
}

/// Progress callback; may be invoked from any task and must not block
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Sink that discards every event
pub fn silent_sink() -> ProgressSink {
    Arc::new(|_| {})
}

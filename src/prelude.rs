//! Prelude module for the Content Updater library
//!
//! Re-exports the items most integrations need, so a single
//! `use content_updater::prelude::*;` is enough for typical usage.
//!
//! # Usage
//!
//! ```rust,no_run
//! use content_updater::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load(None).await?.to_runtime_config()?;
//!     let manager = UpdateManager::from_config(&config, "/games/install")?;
//!
//!     let request = manager.plan_request(None, None);
//!     let operations = manager.plan(&request, &silent_sink()).await?;
//!     println!("{} operations planned", operations.len());
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Entry point and the types flowing through it
pub use crate::app::{
    silent_sink, DiagnosticResult, DiagnosticStatus, Digest, ExecutionOutcome, Manifest,
    ManifestSource, Operation, OperationKind, PatchEntry, PlanRequest, ProgressEvent,
    ProgressSink, UpdateManager,
};

// Injectable seams
pub use crate::app::{Diagnostics, DownloadAgent, PatchTool, UrlResolver};

pub use crate::config::{AppConfig, RuntimeConfig};

pub use crate::constants::{BASE_PACK, DEFAULT_LANGUAGE};

pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        let _request = PlanRequest {
            selected_packs: None,
            language: DEFAULT_LANGUAGE.to_string(),
            target_version: None,
        };
        assert_eq!(BASE_PACK, "Base");
        assert_eq!(OperationKind::PatchDelta.to_string(), "patch-delta");
    }

    #[tokio::test]
    async fn test_prelude_integration_pattern() {
        use tempfile::TempDir;

        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let manager = UpdateManager::builder(root.path(), data.path())
            .build()
            .unwrap();

        assert!(!manager.check_interrupted());
        assert_eq!(manager.content_root(), root.path());
    }
}

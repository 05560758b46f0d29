//! Command-line interface components
//!
//! This module contains CLI-specific code for the content updater,
//! including argument parsing, progress display, command handlers and the
//! line-delimited JSON sidecar transport.

pub mod args;
pub mod commands;
pub mod progress;
pub mod sidecar;

pub use args::{ApplyArgs, BackupAction, BackupArgs, Cli, Commands, GlobalArgs, PlanArgs};
pub use commands::{
    handle_apply, handle_backup, handle_doctor, handle_hash, handle_plan, handle_recover,
    handle_resolve, handle_status, handle_versions, CommandContext,
};
pub use progress::{ProgressConfig, ProgressDisplay};
pub use sidecar::{Sidecar, SidecarError};

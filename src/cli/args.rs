//! Command-line argument parsing for the content updater
//!
//! This module defines the CLI structure using clap derive macros:
//! planning and applying updates, session status and recovery, restore
//! points, diagnostics, and the sidecar transport.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Content Updater - keep a game installation in sync with its manifest
#[derive(Parser, Debug)]
#[command(
    name = "content_updater",
    version,
    about = "Update a game installation in place from a versioned manifest",
    long_about = "Diffs a game installation against a versioned manifest and applies full downloads and binary delta patches.
Interrupted sessions are detected on the next run and can be recovered from restore points."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Game installation directory
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Application data directory (operation log, backups, staging)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the operations needed to bring the installation up to date
    Plan(PlanArgs),

    /// Plan and apply an update
    Apply(ApplyArgs),

    /// Report whether the last session was interrupted
    Status,

    /// Recover from an interrupted session
    Recover {
        /// Restore point name (or absolute archive path) to restore first
        #[arg(long, value_name = "NAME")]
        restore_point: Option<String>,
    },

    /// Close a pack selection over its dependencies
    Resolve {
        /// Selected pack identifiers
        #[arg(required = true)]
        packs: Vec<String>,

        /// Dependency map as JSON, e.g. '{"EP01":["Base"]}'
        #[arg(long, value_name = "JSON", default_value = "{}")]
        deps: String,
    },

    /// Print content digests
    Hash {
        /// Files to hash
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Manage restore points
    Backup(BackupArgs),

    /// Run environment diagnostics
    Doctor {
        /// Remove stale temporary files after the checks
        #[arg(long)]
        repair: bool,
    },

    /// List versions linked from an index page
    Versions {
        /// Index page URL
        #[arg(value_name = "URL")]
        index_url: String,
    },

    /// Serve line-delimited JSON requests on stdin/stdout
    Sidecar,
}

/// Manifest and selection arguments shared by plan and apply
#[derive(Args, Debug, Clone, Default)]
pub struct PlanArgs {
    /// Manifest URL or local manifest file (overrides configuration)
    #[arg(short, long, value_name = "URL|FILE")]
    pub manifest: Option<String>,

    /// Pin the manifest version
    #[arg(long, value_name = "VERSION")]
    pub target_version: Option<String>,

    /// Packs to include (default: every pack the manifest references)
    #[arg(short, long = "pack", value_name = "PACK")]
    pub packs: Vec<String>,

    /// Language code for language packs
    #[arg(short, long)]
    pub language: Option<String>,

    /// Print operations as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the apply command
#[derive(Args, Debug, Clone, Default)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Create a restore point of the affected files before applying
    #[arg(long)]
    pub backup: bool,

    /// Plan only; do not modify the installation
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for restore point management
#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub action: BackupAction,
}

/// Restore point actions
#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Archive files from the installation
    Create {
        /// Paths relative to the installation root
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// List restore points
    List,

    /// Restore a restore point over the installation
    Restore {
        /// Restore point name or absolute archive path
        name: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }

    /// Whether stdout is reserved for the sidecar protocol
    pub fn is_sidecar(&self) -> bool {
        matches!(self.command, Commands::Sidecar)
    }
}

impl PlanArgs {
    /// Pack selection, or `None` for everything
    pub fn selected_packs(&self) -> Option<std::collections::BTreeSet<String>> {
        if self.packs.is_empty() {
            None
        } else {
            Some(self.packs.iter().cloned().collect())
        }
    }
}

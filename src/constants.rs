//! Application constants for Content Updater
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Application identity and data directory naming
pub mod app {
    /// Directory name used under the platform data/config directories
    pub const APP_DIR_NAME: &str = "content-updater";

    /// Config file name inside the config directory
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// Project-local config file name
    pub const LOCAL_CONFIG_FILE_NAME: &str = "content-updater.toml";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";

    /// Log file prefix for the rolling appender
    pub const LOG_FILE_PREFIX: &str = "content_updater.log";
}

/// Pack identifiers and manifest defaults
pub mod packs {
    /// Reserved pack identifier that is always selected
    pub const BASE_PACK: &str = "Base";

    /// Default target language code
    pub const DEFAULT_LANGUAGE: &str = "en_US";

    /// Manifest file name used when templating versioned URLs
    pub const MANIFEST_FILE_NAME: &str = "manifest.json";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "Content-Updater/0.1.0";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Manifest fetch timeout
    pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;

    /// Per-mirror HEAD timeout during mirror discovery
    pub const MIRROR_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum redirect hops followed by the URL resolver
    pub const MAX_RESOLVE_DEPTH: usize = 3;

    /// File extensions treated as direct downloads by the resolver
    pub const DIRECT_DOWNLOAD_EXTENSIONS: &[&str] = &[".torrent", ".zip", ".rar", ".7z", ".exe"];

    /// Probe URL used by the connectivity diagnostic
    pub const CONNECTIVITY_PROBE_URL: &str = "https://google.com";

    /// Connectivity probe timeout
    pub const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Rate limiting and retry configuration
pub mod limits {
    /// Default rate limit for outgoing requests (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;

    /// Maximum retry attempts for failed HTTP downloads
    pub const MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;
}

/// External tool defaults
pub mod tools {
    /// Default binary-diff tool executable
    pub const DEFAULT_XDELTA: &str = "xdelta3";

    /// Default download agent executable
    pub const DEFAULT_ARIA2: &str = "aria2c";

    /// Version flag for xdelta3
    pub const XDELTA_VERSION_FLAG: &str = "-V";

    /// Version flag for aria2c
    pub const ARIA2_VERSION_FLAG: &str = "--version";

    /// Progress line pattern emitted by aria2c
    /// e.g. `[#123456 1.2MiB/4.5MiB(26%) CN:1 DL:1.2MiB ETA:2s]`
    pub const ARIA2_PROGRESS_PATTERN: &str =
        r"\((?P<percent>\d+)%\).*?DL:(?P<speed>[^\]\s]+).*?ETA:(?P<eta>[^\]\s]+)";
}

/// File operation constants
pub mod files {
    /// Session lock sentinel file, relative to the content root
    pub const LOCK_FILE_NAME: &str = "update.lock";

    /// Operation log file, relative to the app data directory
    pub const OPERATION_LOG_FILE: &str = "operations.json";

    /// Restore point directory, relative to the app data directory
    pub const BACKUPS_DIR: &str = "backups";

    /// Staging directory for downloaded deltas, relative to app data
    pub const STAGING_DIR: &str = "staging";

    /// Temporary file suffix for patch output and downloads
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Suffix for the original file held aside during a swap
    pub const BACKUP_FILE_SUFFIX: &str = ".bak";

    /// Suffix for staged delta files
    pub const DELTA_FILE_SUFFIX: &str = ".delta";

    /// Restore point archive extension
    pub const ARCHIVE_EXTENSION: &str = "zip";

    /// Default restore point name prefix
    pub const RESTORE_POINT_PREFIX: &str = "AutoPatch_Pre";

    /// Timestamp format used in restore point names
    pub const RESTORE_POINT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

    /// Write-probe file used by the permission diagnostic
    pub const WRITE_TEST_FILE: &str = ".write_test";

    /// Read buffer for streaming digests (64KB)
    pub const HASH_BUFFER_SIZE: usize = 64 * 1024;
}

/// Diagnostic thresholds and check names
pub mod diagnostics {
    /// Minimum free space before the disk check warns (1 GiB)
    pub const MIN_FREE_SPACE_BYTES: u64 = 1024 * 1024 * 1024;

    /// Name of the permission check; its failure blocks recovery
    pub const PERMISSIONS_CHECK: &str = "Permissions";

    /// Name of the connectivity check
    pub const CONNECTIVITY_CHECK: &str = "Connectivity";

    /// Name of the disk space check
    pub const DISK_SPACE_CHECK: &str = "Disk Space";
}

/// Operation log identifiers
pub mod oplog {
    /// Prefix for full-download log entries
    pub const DOWNLOAD_ID_PREFIX: &str = "dl";

    /// Prefix for delta-patch log entries
    pub const PATCH_ID_PREFIX: &str = "patch";
}

// Re-export commonly used constants for convenience
pub use files::{LOCK_FILE_NAME, OPERATION_LOG_FILE, TEMP_FILE_SUFFIX};
pub use http::USER_AGENT;
pub use packs::{BASE_PACK, DEFAULT_LANGUAGE};

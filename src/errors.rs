//! Error types for Content Updater
//!
//! This module defines error types for every component of the updater.
//! Each component fails with its own small, closed set of error kinds so
//! callers can branch on the kind instead of matching on message text.

use std::path::PathBuf;
use thiserror::Error;

/// Content hashing errors
#[derive(Error, Debug)]
pub enum HashError {
    /// File does not exist (callers usually treat this as "needs download")
    #[error("File not found when hashing: {path}")]
    NotFound { path: PathBuf },

    /// File exists but cannot be read
    #[error("Permission denied reading file for hash: {path}")]
    PermissionDenied { path: PathBuf },

    /// Any other I/O failure while reading the file
    #[error("I/O error while hashing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hashing task could not be joined
    #[error("Hashing task failed: {reason}")]
    TaskFailed { reason: String },
}

impl HashError {
    /// Classify an I/O error raised while hashing `path`
    pub fn from_io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        let path = path.into();
        match error.kind() {
            std::io::ErrorKind::NotFound => HashError::NotFound { path },
            std::io::ErrorKind::PermissionDenied => HashError::PermissionDenied { path },
            _ => HashError::Io {
                path,
                source: error,
            },
        }
    }
}

/// Manifest fetching and parsing errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Top-level document is not a JSON object
    #[error("Invalid manifest format: {reason}")]
    InvalidFormat { reason: String },

    /// Manifest text is not well-formed JSON
    #[error("Failed to parse manifest JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Required field missing from a file entry
    #[error("Manifest entry {index} is missing required field '{field}'")]
    MissingField { index: usize, field: String },

    /// Entry carries an unusable value
    #[error("Manifest entry {index} is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },

    /// Manifest host answered with an error status
    #[error("Manifest fetch failed: HTTP {status} from {url}")]
    ManifestFetchFailed { url: String, status: u16 },

    /// Manifest host answered 404
    #[error("Manifest not found at {url} - invalid URL or version")]
    ManifestNotFound { url: String },

    /// Manifest request timed out
    #[error("Manifest fetch timed out: {url}")]
    NetworkTimeout { url: String },

    /// Manifest host could not be reached
    #[error("Unable to reach manifest server: {url}")]
    NetworkUnreachable { url: String },

    /// Manifest URL could not be parsed
    #[error("Invalid manifest URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Local manifest file could not be read
    #[error("I/O error reading manifest")]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    /// Whether the failure happened while fetching (as opposed to parsing)
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ManifestError::ManifestFetchFailed { .. }
                | ManifestError::ManifestNotFound { .. }
                | ManifestError::NetworkTimeout { .. }
                | ManifestError::NetworkUnreachable { .. }
        )
    }
}

/// Mirror/URL resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Reference could not be turned into a URL
    #[error("Invalid download reference: {reference} - {error}")]
    InvalidUrl { reference: String, error: String },
}

/// Operation planning errors
#[derive(Error, Debug)]
pub enum PlanError {
    /// Manifest could not be fetched or parsed
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A download reference could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A local file could not be classified
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Entry cannot be satisfied with the references it carries
    #[error("Cannot plan {file}: {reason}")]
    Unplannable { file: String, reason: String },
}

/// Binary patch errors
#[derive(Error, Debug)]
pub enum PatchError {
    /// Source file to patch is missing
    #[error("Source file missing: {path}")]
    SourceMissing { path: PathBuf },

    /// Delta file is missing
    #[error("Patch file missing: {path}")]
    DeltaMissing { path: PathBuf },

    /// External diff tool could not be started
    #[error("Failed to start patch tool {tool}: {reason}")]
    ToolSpawn { tool: String, reason: String },

    /// External diff tool reported failure
    #[error("Patch application failed: {diagnostics}")]
    PatchApplicationFailed { diagnostics: String },

    /// Patched output does not match the expected digest
    #[error("Patch verification failed for {path}. Expected: {expected}, got: {actual}")]
    PatchVerificationFailed {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Replacing the original with the patched output failed
    #[error("Atomic swap failed: could not replace {target} with {temp_path}: {reason}")]
    PatchSwapFailed {
        temp_path: PathBuf,
        target: PathBuf,
        reason: String,
    },

    /// Verifying the patched output failed for I/O reasons
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Download agent and queue errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// HTTP request error
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Invalid URL provided
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Server returned error status
    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    /// External download agent could not be started
    #[error("Failed to start download agent {agent}: {reason}")]
    AgentSpawn { agent: String, reason: String },

    /// External download agent exited unsuccessfully
    #[error("Download agent failed for {url} with exit code {code:?}")]
    AgentFailed { url: String, code: Option<i32> },

    /// Atomic file operation failed
    #[error("Atomic file operation failed: could not rename {temp_path} to {final_path}")]
    AtomicOperationFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },

    /// Maximum retries exceeded
    #[error("Maximum retry attempts ({max_retries}) exceeded for download")]
    MaxRetriesExceeded { max_retries: u32 },

    /// Rate limiter could not be built
    #[error("Invalid client configuration: {reason}")]
    Configuration { reason: String },
}

/// Operation log persistence errors
#[derive(Error, Debug)]
pub enum OperationLogError {
    /// Log file could not be read or written
    #[error("Operation log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Log contents could not be serialized
    #[error("Operation log serialization error")]
    Json(#[from] serde_json::Error),
}

/// Restore point archive errors
#[derive(Error, Debug)]
pub enum BackupError {
    /// Restore point does not exist
    #[error("Restore point not found: {name}")]
    NotFound { name: String },

    /// Archive read/write failure
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Underlying file operation failed
    #[error("Backup I/O error")]
    Io(#[from] std::io::Error),

    /// Archive entry would escape the content root
    #[error("Archive entry has unsafe path: {entry}")]
    UnsafePath { entry: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Standard directory could not be determined
    #[error("Could not determine {what} directory")]
    DirectoryUnavailable { what: String },

    /// Config file could not be read or written
    #[error("Configuration I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Hashing error
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Manifest error
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Resolver error
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Planning error
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Patch error
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Operation log error
    #[error(transparent)]
    OperationLog(#[from] OperationLogError),

    /// Backup error
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is transient and worth offering a retry for
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Manifest(ManifestError::NetworkTimeout { .. })
            | AppError::Manifest(ManifestError::NetworkUnreachable { .. })
            | AppError::Manifest(ManifestError::ManifestFetchFailed { .. })
            | AppError::Download(DownloadError::Http(_))
            | AppError::Download(DownloadError::ServerError { .. })
            | AppError::Plan(PlanError::Manifest(ManifestError::NetworkTimeout { .. }))
            | AppError::Plan(PlanError::Manifest(ManifestError::NetworkUnreachable { .. }))
            | AppError::Download(DownloadError::AgentFailed { .. }) => true,

            AppError::Manifest(ManifestError::ManifestNotFound { .. })
            | AppError::Manifest(ManifestError::ParseError(_))
            | AppError::Manifest(ManifestError::InvalidFormat { .. })
            | AppError::Hash(HashError::PermissionDenied { .. })
            | AppError::Patch(PatchError::PatchVerificationFailed { .. }) => false,

            _ => false,
        }
    }

    /// Get error category for logging and transport error codes
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Hash(_) => "hash",
            AppError::Manifest(_) => "manifest",
            AppError::Resolve(_) => "resolve",
            AppError::Plan(_) => "plan",
            AppError::Patch(_) => "patch",
            AppError::Download(_) => "download",
            AppError::OperationLog(_) => "operation_log",
            AppError::Backup(_) => "backup",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Hash result type alias
pub type HashResult<T> = std::result::Result<T, HashError>;

/// Manifest result type alias
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Resolver result type alias
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Planning result type alias
pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Patch result type alias
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Operation log result type alias
pub type OperationLogResult<T> = std::result::Result<T, OperationLogError>;

/// Backup result type alias
pub type BackupResult<T> = std::result::Result<T, BackupError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

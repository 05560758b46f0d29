//! Configuration management for the content updater
//!
//! This module provides TOML configuration with automatic first-run
//! initialization, multi-source loading, and zero-config defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::ClientConfig;
use crate::constants::{app, files, http, limits, packs, tools};
use crate::errors::{ConfigError, ConfigResult, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Data and content locations
    pub paths: PathsConfigToml,
    /// Manifest source settings
    pub manifest: ManifestConfigToml,
    /// HTTP client settings
    pub client: ClientConfigToml,
    /// Content hashing settings
    pub hashing: HashingConfigToml,
    /// External tool settings
    pub tools: ToolsConfigToml,
    /// Restore point settings
    pub backup: BackupConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly path configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PathsConfigToml {
    /// Private data directory (operation log, backups, staging)
    pub app_data_dir: Option<PathBuf>,
    /// Default game installation to update
    pub content_root: Option<PathBuf>,
}

/// TOML-friendly manifest configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManifestConfigToml {
    /// Manifest URL, or a base URL that versions are appended to
    pub url: Option<String>,
    /// Mirror that relative download references are joined onto
    pub mirror: Option<String>,
    /// Language code kept when filtering language packs
    pub default_language: String,
    /// Follow download redirects before planning
    pub resolve_redirects: bool,
}

impl Default for ManifestConfigToml {
    fn default() -> Self {
        Self {
            url: None,
            mirror: None,
            default_language: packs::DEFAULT_LANGUAGE.to_string(),
            resolve_redirects: false,
        }
    }
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfigToml {
    /// TCP keep-alive timeout in seconds (None = disabled)
    pub tcp_keepalive_secs: Option<u64>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout in seconds (None = no timeout)
    pub pool_idle_timeout_secs: Option<u64>,
    /// Maximum connections per host
    pub pool_max_per_host: usize,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Manifest fetch timeout in seconds
    pub manifest_timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            tcp_keepalive_secs: Some(30),
            tcp_nodelay: true,
            pool_idle_timeout_secs: Some(http::POOL_IDLE_TIMEOUT.as_secs()),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout_secs: http::DEFAULT_TIMEOUT.as_secs(),
            manifest_timeout_secs: http::MANIFEST_TIMEOUT.as_secs(),
            connect_timeout_secs: http::CONNECT_TIMEOUT.as_secs(),
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
        }
    }
}

/// TOML-friendly hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct HashingConfigToml {
    /// Concurrent hashing workers (0 = available CPU parallelism)
    pub worker_count: usize,
}

/// Which download agent fetches content
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAgentKind {
    /// External aria2c process
    #[default]
    Aria2,
    /// In-process HTTP client
    Http,
}

/// TOML-friendly external tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfigToml {
    /// Delta patch tool executable
    pub xdelta_path: PathBuf,
    /// aria2c executable
    pub aria2_path: PathBuf,
    /// Download agent to use
    pub download_agent: DownloadAgentKind,
    /// Downloads run at once
    pub download_concurrency: usize,
    /// Patch tool timeout in seconds (0 = none)
    pub patch_timeout_secs: u64,
}

impl Default for ToolsConfigToml {
    fn default() -> Self {
        Self {
            xdelta_path: PathBuf::from(tools::DEFAULT_XDELTA),
            aria2_path: PathBuf::from(tools::DEFAULT_ARIA2),
            download_agent: DownloadAgentKind::default(),
            download_concurrency: 1,
            patch_timeout_secs: 0,
        }
    }
}

/// TOML-friendly restore point configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackupConfigToml {
    /// Archive name prefix
    pub prefix: String,
}

impl Default for BackupConfigToml {
    fn default() -> Self {
        Self {
            prefix: files::RESTORE_POINT_PREFIX.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Enable daily rolling file logging under `<app_data>/logs`
    pub file_logging: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
            colored_output: true,
        }
    }
}

/// Resolved runtime settings
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub app_data_dir: PathBuf,
    pub content_root: Option<PathBuf>,
    pub manifest_url: Option<String>,
    pub mirror: Option<String>,
    pub default_language: String,
    pub resolve_redirects: bool,
    pub client: ClientConfig,
    pub hash_workers: usize,
    pub xdelta_path: PathBuf,
    pub aria2_path: PathBuf,
    pub download_agent: DownloadAgentKind,
    pub download_concurrency: usize,
    pub patch_timeout: Option<Duration>,
    pub backup_prefix: String,
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> ConfigResult<RuntimeConfig> {
        let app_data_dir = match &self.paths.app_data_dir {
            Some(dir) => dir.clone(),
            None => Self::default_app_data_dir()?,
        };

        Ok(RuntimeConfig {
            app_data_dir,
            content_root: self.paths.content_root.clone(),
            manifest_url: self.manifest.url.clone(),
            mirror: self.manifest.mirror.clone(),
            default_language: self.manifest.default_language.clone(),
            resolve_redirects: self.manifest.resolve_redirects,
            client: self.client.to_runtime_config(),
            hash_workers: self.hashing.worker_count,
            xdelta_path: self.tools.xdelta_path.clone(),
            aria2_path: self.tools.aria2_path.clone(),
            download_agent: self.tools.download_agent,
            download_concurrency: self.tools.download_concurrency.max(1),
            patch_timeout: (self.tools.patch_timeout_secs > 0)
                .then(|| Duration::from_secs(self.tools.patch_timeout_secs)),
            backup_prefix: self.backup.prefix.clone(),
        })
    }

    /// Load configuration with precedence:
    /// 1. Explicit config file (must exist)
    /// 2. `./content-updater.toml`
    /// 3. User config directory
    /// 4. Default values
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path }.into());
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        match config_path {
            Some(path) => Ok(Self::load_from_file(&path).await?),
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Initialize configuration on first run
    ///
    /// Creates a default config file in the user config directory if none
    /// exists and tells the user where it is.
    pub async fn initialize_first_run() -> Result<Option<PathBuf>> {
        let config_path = Self::get_default_config_path()?;

        if config_path.exists() {
            return Ok(Some(config_path));
        }

        info!("Creating default configuration file...");

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&config_path, Self::generate_default_config_content())
            .await
            .map_err(|source| ConfigError::Io {
                path: config_path.clone(),
                source,
            })?;

        println!("📁 Created default configuration file:");
        println!("   {}", config_path.display());
        println!("   You can customize settings by editing this file.");
        println!();

        Ok(Some(config_path))
    }

    /// Default private data directory
    pub fn default_app_data_dir() -> ConfigResult<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join(app::APP_DIR_NAME))
            .ok_or_else(|| ConfigError::DirectoryUnavailable {
                what: "user data".to_string(),
            })
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(".").join(app::LOCAL_CONFIG_FILE_NAME)];
        if let Ok(user_config) = Self::get_default_config_path() {
            search_paths.push(user_config);
        }

        let found = search_paths.into_iter().find(|path| path.exists());
        match &found {
            Some(path) => debug!("Found config file: {}", path.display()),
            None => debug!("No config file found in standard locations"),
        }
        found
    }

    /// Get the default config file path for the current user
    fn get_default_config_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::DirectoryUnavailable {
            what: "user config".to_string(),
        })?;

        Ok(config_dir
            .join(app::APP_DIR_NAME)
            .join(app::CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config: AppConfig = toml::from_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    pub fn generate_default_config_content() -> String {
        let default_data_path = Self::default_app_data_dir()
            .unwrap_or_else(|_| PathBuf::from(".").join(app::APP_DIR_NAME));

        format!(
            r#"# Content Updater Configuration
# This file was automatically generated on first run.
# You can customize any of these settings to suit your needs.

[paths]
# Private data directory (default: {data})
# app_data_dir = "/path/to/data"
# Game installation updated when --root is not given
# content_root = "/path/to/game"

[manifest]
# Manifest URL, or base URL that "<version>/manifest.json" is appended to
# url = "https://example.com/patches/manifest.json"
# Mirror that relative download references are joined onto
# mirror = "https://mirror.example.com/files/"
default_language = "{language}"
resolve_redirects = false

[client]
# HTTP client settings
tcp_keepalive_secs = 30
tcp_nodelay = true
pool_idle_timeout_secs = {pool_idle}
pool_max_per_host = {pool_max}
request_timeout_secs = {request_timeout}
manifest_timeout_secs = {manifest_timeout}
connect_timeout_secs = {connect_timeout}
rate_limit_rps = {rps}

[hashing]
# Concurrent hashing workers (0 = number of CPUs)
worker_count = 0

[tools]
xdelta_path = "{xdelta}"
aria2_path = "{aria2}"
download_agent = "aria2"  # aria2 or http
download_concurrency = 1
patch_timeout_secs = 0  # 0 = no limit

[backup]
prefix = "{prefix}"

[logging]
level = "info"  # error, warn, info, debug, trace
file_logging = false
colored_output = true
"#,
            data = default_data_path.display(),
            language = packs::DEFAULT_LANGUAGE,
            pool_idle = http::POOL_IDLE_TIMEOUT.as_secs(),
            pool_max = http::POOL_MAX_PER_HOST,
            request_timeout = http::DEFAULT_TIMEOUT.as_secs(),
            manifest_timeout = http::MANIFEST_TIMEOUT.as_secs(),
            connect_timeout = http::CONNECT_TIMEOUT.as_secs(),
            rps = limits::DEFAULT_RATE_LIMIT_RPS,
            xdelta = tools::DEFAULT_XDELTA,
            aria2 = tools::DEFAULT_ARIA2,
            prefix = files::RESTORE_POINT_PREFIX,
        )
    }
}

impl ClientConfigToml {
    /// Convert to runtime ClientConfig
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            tcp_keepalive: self.tcp_keepalive_secs.map(Duration::from_secs),
            tcp_nodelay: self.tcp_nodelay,
            pool_idle_timeout: self.pool_idle_timeout_secs.map(Duration::from_secs),
            pool_max_per_host: self.pool_max_per_host,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            manifest_timeout: Duration::from_secs(self.manifest_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            rate_limit_rps: self.rate_limit_rps,
        }
    }
}

//! Manifest retrieval
//!
//! Fetching is kept apart from parsing: a [`ManifestSource`] only returns
//! text, and the planner hands that text to the parser. Network failures are
//! classified into distinct [`ManifestError`] kinds and never retried here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, error, info};
use url::Url;

use super::parser::parse_manifest;
use super::types::Manifest;
use crate::app::client::HttpHandler;
use crate::constants::{http, packs};
use crate::errors::{ManifestError, ManifestResult};

/// Anything that can produce manifest text for the latest or a pinned version
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch raw manifest text
    async fn fetch_manifest_text(&self, version: Option<&str>) -> ManifestResult<String>;

    /// Fetch and parse a manifest
    async fn fetch_manifest(&self, version: Option<&str>) -> ManifestResult<Manifest> {
        let text = self.fetch_manifest_text(version).await?;
        parse_manifest(&text)
    }

    /// Human-readable location, used in log lines
    fn describe(&self) -> String;
}

/// Apply the versioned-manifest naming convention to a base URL
///
/// A base ending in a `.json` file name has its file replaced by
/// `<version>/manifest.json`; any other base gets `<version>/manifest.json`
/// appended as path segments.
pub fn versioned_manifest_url(base: &str, version: &str) -> String {
    if base.ends_with(".json") {
        let dir = base.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(base);
        format!("{}/{}/{}", dir, version, packs::MANIFEST_FILE_NAME)
    } else {
        format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            version,
            packs::MANIFEST_FILE_NAME
        )
    }
}

/// Manifest served over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    handler: Arc<HttpHandler>,
    base_url: String,
    timeout: Duration,
}

impl HttpManifestSource {
    /// Create a source for the given base manifest URL
    pub fn new(handler: Arc<HttpHandler>, base_url: impl Into<String>) -> Self {
        Self {
            handler,
            base_url: base_url.into(),
            timeout: http::MANIFEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL that would be requested for the given version
    pub fn manifest_url(&self, version: Option<&str>) -> String {
        match version {
            Some(version) => versioned_manifest_url(&self.base_url, version),
            None => self.base_url.clone(),
        }
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch_manifest_text(&self, version: Option<&str>) -> ManifestResult<String> {
        let url_text = self.manifest_url(version);
        let url = Url::parse(&url_text).map_err(|e| ManifestError::InvalidUrl {
            url: url_text.clone(),
            error: e.to_string(),
        })?;

        info!("Fetching manifest from {}", url);
        let response = self
            .handler
            .send_once(Method::GET, &url, Some(self.timeout))
            .await
            .map_err(|e| classify_request_error(&url_text, &e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            error!("Manifest not found at {}", url_text);
            return Err(ManifestError::ManifestNotFound { url: url_text });
        }
        if !status.is_success() {
            error!("Manifest fetch from {} failed: HTTP {}", url_text, status);
            return Err(ManifestError::ManifestFetchFailed {
                url: url_text,
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify_request_error(&url_text, &e))?;
        debug!("Fetched {} bytes of manifest text", text.len());
        Ok(text)
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

fn classify_request_error(url: &str, error: &reqwest::Error) -> ManifestError {
    error!("Network error fetching manifest {}: {}", url, error);
    if error.is_timeout() {
        ManifestError::NetworkTimeout {
            url: url.to_string(),
        }
    } else if let Some(status) = error.status() {
        ManifestError::ManifestFetchFailed {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        ManifestError::NetworkUnreachable {
            url: url.to_string(),
        }
    }
}

/// Manifest stored on the local filesystem
///
/// Pinned versions resolve to `<dir>/<version>/manifest.json` beside the
/// base file, mirroring the HTTP layout.
#[derive(Debug, Clone)]
pub struct FileManifestSource {
    path: PathBuf,
}

impl FileManifestSource {
    /// Create a source reading the given manifest file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn path_for(&self, version: Option<&str>) -> PathBuf {
        match version {
            Some(version) => {
                let dir = self.path.parent().map(PathBuf::from).unwrap_or_default();
                dir.join(version).join(packs::MANIFEST_FILE_NAME)
            }
            None => self.path.clone(),
        }
    }
}

#[async_trait]
impl ManifestSource for FileManifestSource {
    async fn fetch_manifest_text(&self, version: Option<&str>) -> ManifestResult<String> {
        let path = self.path_for(version);
        debug!("Reading manifest from {}", path.display());
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ManifestError::ManifestNotFound {
                    url: path.display().to_string(),
                }
            } else {
                ManifestError::Io(e)
            }
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed manifest text, for embedding callers and tests
#[derive(Debug, Clone)]
pub struct StaticManifestSource {
    text: String,
}

impl StaticManifestSource {
    /// Serve the given text for every request
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ManifestSource for StaticManifestSource {
    async fn fetch_manifest_text(&self, _version: Option<&str>) -> ManifestResult<String> {
        Ok(self.text.clone())
    }

    fn describe(&self) -> String {
        "<inline manifest>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::{build_handler, ClientConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_versioned_url_replaces_manifest_file() {
        assert_eq!(
            versioned_manifest_url("https://cdn.example.com/patches/manifest.json", "1.2.3"),
            "https://cdn.example.com/patches/1.2.3/manifest.json"
        );
    }

    #[test]
    fn test_versioned_url_appends_segment() {
        assert_eq!(
            versioned_manifest_url("https://cdn.example.com/patches/", "1.2.3"),
            "https://cdn.example.com/patches/1.2.3/manifest.json"
        );
    }

    #[tokio::test]
    async fn test_file_source_reads_pinned_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("manifest.json");
        std::fs::write(&base, r#"{"version":"2.0","files":[]}"#).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("1.0")).unwrap();
        std::fs::write(
            temp_dir.path().join("1.0").join("manifest.json"),
            r#"{"version":"1.0","files":[]}"#,
        )
        .unwrap();

        let source = FileManifestSource::new(&base);
        let latest = source.fetch_manifest(None).await.unwrap();
        let pinned = source.fetch_manifest(Some("1.0")).await.unwrap();
        assert_eq!(latest.target_version(), Some("2.0"));
        assert_eq!(pinned.target_version(), Some("1.0"));
    }

    #[tokio::test]
    async fn test_file_source_missing_is_not_found() {
        let source = FileManifestSource::new("/definitely/not/here/manifest.json");
        let result = source.fetch_manifest_text(None).await;
        assert!(matches!(result, Err(ManifestError::ManifestNotFound { .. })));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_request() {
        let handler = Arc::new(build_handler(&ClientConfig::default()).unwrap());
        let source = HttpManifestSource::new(handler, "not a url");
        let result = source.fetch_manifest_text(None).await;
        assert!(matches!(result, Err(ManifestError::InvalidUrl { .. })));
    }

    fn http_source(base: String) -> HttpManifestSource {
        let handler = Arc::new(build_handler(&ClientConfig::default()).unwrap());
        HttpManifestSource::new(handler, base)
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = http_source(format!("http://{}/manifest.json", addr));
        let result = source.fetch_manifest_text(None).await;
        assert!(
            matches!(result, Err(ManifestError::NetworkUnreachable { .. })),
            "{:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_missing_pinned_version_is_not_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let source = http_source(format!("http://{}/patches/manifest.json", addr));
        let result = source.fetch_manifest_text(Some("1.2.3")).await;

        let expected = format!("http://{}/patches/1.2.3/manifest.json", addr);
        match result {
            Err(ManifestError::ManifestNotFound { url }) => assert_eq!(url, expected),
            other => panic!("Expected ManifestNotFound, got {:?}", other),
        }
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /patches/1.2.3/manifest.json "));
    }

    #[tokio::test]
    async fn test_silent_server_is_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let source = http_source(format!("http://{}/manifest.json", addr))
            .with_timeout(Duration::from_millis(200));
        let result = source.fetch_manifest_text(None).await;
        assert!(
            matches!(result, Err(ManifestError::NetworkTimeout { .. })),
            "{:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_static_source_parses() {
        let source = StaticManifestSource::new("[]");
        let result = source.fetch_manifest(None).await;
        assert!(matches!(result, Err(ManifestError::InvalidFormat { .. })));
    }
}

//! File download operations with atomic writes and streaming
//!
//! Content is streamed into a sibling `.tmp` file and only renamed onto the
//! destination once the transfer completed, so an interrupted download never
//! leaves a truncated file under the final name.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::app::client::http::{backoff_delay, HttpHandler};
use crate::app::paths;
use crate::constants::limits;
use crate::errors::{DownloadError, DownloadResult};

/// Byte-level progress: `(downloaded, total if known)`
pub type ByteProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// File download operations handler
pub struct DownloadHandler<'a> {
    http_handler: &'a HttpHandler,
}

impl<'a> DownloadHandler<'a> {
    /// Creates a new DownloadHandler with the given HTTP handler
    pub fn new(http_handler: &'a HttpHandler) -> Self {
        Self { http_handler }
    }

    /// Downloads a file to the specified path with atomic operations
    ///
    /// An existing destination is replaced. Failed attempts are retried with
    /// exponential backoff; the temporary file is removed on final failure.
    pub async fn download_file(
        &self,
        url: &Url,
        destination: &Path,
        on_progress: ByteProgress<'_>,
    ) -> DownloadResult<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = paths::temp_path(destination);

        let mut retries = 0;
        loop {
            match self.download_attempt(url, &temp_path, on_progress).await {
                Ok(()) => {
                    tokio::fs::rename(&temp_path, destination)
                        .await
                        .map_err(|_e| DownloadError::AtomicOperationFailed {
                            temp_path: temp_path.clone(),
                            final_path: destination.to_path_buf(),
                        })?;
                    tracing::info!("Successfully downloaded: {}", destination.display());
                    return Ok(());
                }
                Err(e) if retries < limits::MAX_RETRIES => {
                    retries += 1;
                    let delay = backoff_delay(retries);
                    tracing::warn!(
                        "Download failed (attempt {}/{}): {}. Retrying in {}ms",
                        retries,
                        limits::MAX_RETRIES,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if temp_path.exists() {
                        let _ = tokio::fs::remove_file(&temp_path).await;
                    }
                    tracing::error!(
                        "Download failed after {} retries: {}",
                        limits::MAX_RETRIES,
                        e
                    );
                    return Err(DownloadError::MaxRetriesExceeded {
                        max_retries: limits::MAX_RETRIES,
                    });
                }
            }
        }
    }

    async fn download_attempt(
        &self,
        url: &Url,
        temp_path: &Path,
        on_progress: ByteProgress<'_>,
    ) -> DownloadResult<()> {
        let mut response = self.http_handler.get_response(url).await?;

        if !response.status().is_success() {
            return Err(DownloadError::ServerError {
                status: response.status().as_u16(),
            });
        }

        let total = response.content_length();
        let mut file = File::create(temp_path).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }
        file.flush().await?;

        Ok(())
    }
}

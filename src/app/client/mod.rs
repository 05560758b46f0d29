//! HTTP client layer
//!
//! The module is organized into specialized components:
//! - `config`: HTTP client configuration and building
//! - `http`: Core HTTP operations with rate limiting and retries
//! - `download`: Streaming file downloads with atomic writes

pub mod config;
pub mod download;
pub mod http;

pub use config::ClientConfig;
pub use download::{ByteProgress, DownloadHandler};
pub use http::HttpHandler;

use crate::errors::DownloadResult;

/// Build a rate-limited handler from a client configuration
pub fn build_handler(config: &ClientConfig) -> DownloadResult<HttpHandler> {
    let client = config.build_http_client()?;
    HttpHandler::new(client, config.rate_limit_rps)
}

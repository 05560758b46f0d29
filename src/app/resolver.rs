//! Mirror and download URL resolution
//!
//! Manifests carry download references that are not always directly
//! fetchable: they may be relative to a mirror, or point at a redirector.
//! The planner turns each reference into a concrete URL through the narrow
//! [`UrlResolver`] interface. The mirror in use is an explicit
//! [`MirrorContext`] handed to the resolver when it is built; which mirror
//! to use can be chosen by probing candidates with [`MirrorDiscovery`].

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{header::LOCATION, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::app::client::{ClientConfig, HttpHandler};
use crate::constants::http;
use crate::errors::{DownloadResult, ResolveError, ResolveResult};

/// Turns a manifest download reference into a fetchable URL
#[async_trait]
pub trait UrlResolver: Send + Sync {
    /// Resolve a reference; implementations may perform network calls
    async fn resolve(&self, reference: &str) -> ResolveResult<String>;
}

/// Mirror selection for the current session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorContext {
    /// Base URL relative references are joined onto
    pub selected_mirror: Option<Url>,
}

impl MirrorContext {
    /// Context without a selected mirror
    pub fn none() -> Self {
        Self::default()
    }

    /// Context using the given mirror base
    pub fn with_mirror(mirror: Url) -> Self {
        Self {
            selected_mirror: Some(mirror),
        }
    }

    /// Absolute URL for a reference
    ///
    /// Absolute references are returned unchanged. Relative references are
    /// joined onto the selected mirror and fail when none is selected.
    pub fn absolute(&self, reference: &str) -> ResolveResult<Url> {
        match Url::parse(reference) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mirror = self
                    .selected_mirror
                    .as_ref()
                    .ok_or_else(|| ResolveError::InvalidUrl {
                        reference: reference.to_string(),
                        error: "relative reference and no mirror selected".to_string(),
                    })?;
                mirror.join(reference).map_err(|e| ResolveError::InvalidUrl {
                    reference: reference.to_string(),
                    error: e.to_string(),
                })
            }
            Err(e) => Err(ResolveError::InvalidUrl {
                reference: reference.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

/// Candidate content mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    /// Base URL of the mirror
    pub url: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Operator preference; higher wins among available mirrors
    #[serde(default)]
    pub weight: i64,
}

/// Result of probing one mirror
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorProbe {
    #[serde(flatten)]
    pub mirror: Mirror,
    /// Whether the mirror answered the probe with `200 OK`
    pub available: bool,
    /// Round trip of the probe in seconds; `None` if no answer arrived
    pub latency: Option<f64>,
    /// Transport or status error, when not available
    pub error: Option<String>,
}

impl MirrorProbe {
    /// Mirror context using this mirror, if it was available and parses
    pub fn context(&self) -> Option<MirrorContext> {
        if !self.available {
            return None;
        }
        Url::parse(&self.mirror.url)
            .ok()
            .map(MirrorContext::with_mirror)
    }
}

/// Probes mirrors in parallel and ranks them
#[derive(Debug, Clone)]
pub struct MirrorDiscovery {
    handler: Arc<HttpHandler>,
    timeout: Duration,
}

impl MirrorDiscovery {
    pub fn new(handler: Arc<HttpHandler>) -> Self {
        Self {
            handler,
            timeout: http::MIRROR_PROBE_TIMEOUT,
        }
    }

    /// Override the per-mirror probe timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// HEAD one mirror and time the answer
    pub async fn probe(&self, mirror: &Mirror) -> MirrorProbe {
        let unavailable = |latency: Option<f64>, error: String| MirrorProbe {
            mirror: mirror.clone(),
            available: false,
            latency,
            error: Some(error),
        };

        let url = match Url::parse(&mirror.url) {
            Ok(url) => url,
            Err(e) => return unavailable(None, e.to_string()),
        };

        let start = Instant::now();
        match self
            .handler
            .send_once(Method::HEAD, &url, Some(self.timeout))
            .await
        {
            Ok(response) => {
                let latency = start.elapsed().as_secs_f64();
                if response.status() == StatusCode::OK {
                    MirrorProbe {
                        mirror: mirror.clone(),
                        available: true,
                        latency: Some(latency),
                        error: None,
                    }
                } else {
                    unavailable(Some(latency), format!("HTTP {}", response.status()))
                }
            }
            Err(e) => {
                debug!("Mirror {} unreachable: {}", mirror.url, e);
                unavailable(None, e.to_string())
            }
        }
    }

    /// Probe every mirror concurrently; best first
    ///
    /// # Returns
    ///
    /// One probe per input mirror, ordered available first, then by
    /// descending weight, then by ascending latency.
    pub async fn discover(&self, mirrors: &[Mirror]) -> Vec<MirrorProbe> {
        let mut probes = join_all(mirrors.iter().map(|m| self.probe(m))).await;
        rank_probes(&mut probes);
        info!(
            "Probed {} mirrors, {} available",
            probes.len(),
            probes.iter().filter(|p| p.available).count()
        );
        probes
    }

    /// Probe and return the context for the best available mirror
    pub async fn select_best(&self, mirrors: &[Mirror]) -> Option<MirrorContext> {
        self.discover(mirrors)
            .await
            .iter()
            .find_map(MirrorProbe::context)
    }
}

/// Sort probes: available first, heavier first, faster first
pub fn rank_probes(probes: &mut [MirrorProbe]) {
    probes.sort_by(|a, b| {
        b.available
            .cmp(&a.available)
            .then_with(|| b.mirror.weight.cmp(&a.mirror.weight))
            .then_with(|| match (a.latency, b.latency) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    });
}

/// Resolver that only applies the mirror context, without network access
#[derive(Debug, Clone, Default)]
pub struct PassthroughResolver {
    mirror: MirrorContext,
}

impl PassthroughResolver {
    /// Create a resolver for the given mirror context
    pub fn new(mirror: MirrorContext) -> Self {
        Self { mirror }
    }
}

#[async_trait]
impl UrlResolver for PassthroughResolver {
    async fn resolve(&self, reference: &str) -> ResolveResult<String> {
        Ok(self.mirror.absolute(reference)?.to_string())
    }
}

/// Resolver that walks HTTP redirect chains with HEAD requests
///
/// Direct archive links are returned untouched. The walk stops after a
/// bounded number of hops, and a network failure yields the last known URL
/// so a flaky redirector does not abort planning.
#[derive(Debug, Clone)]
pub struct HttpRedirectResolver {
    handler: Arc<HttpHandler>,
    mirror: MirrorContext,
    max_depth: usize,
}

impl HttpRedirectResolver {
    /// Build a resolver with its own non-redirecting client
    pub fn new(config: &ClientConfig, mirror: MirrorContext) -> DownloadResult<Self> {
        let client = config.build_non_redirecting_client()?;
        let handler = HttpHandler::new(client, config.rate_limit_rps)?;
        Ok(Self {
            handler: Arc::new(handler),
            mirror,
            max_depth: http::MAX_RESOLVE_DEPTH,
        })
    }

    /// Override the maximum number of redirect hops
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn is_direct_download(url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        http::DIRECT_DOWNLOAD_EXTENSIONS
            .iter()
            .any(|ext| path.ends_with(ext))
    }
}

#[async_trait]
impl UrlResolver for HttpRedirectResolver {
    async fn resolve(&self, reference: &str) -> ResolveResult<String> {
        let mut current = self.mirror.absolute(reference)?;

        for depth in 0..=self.max_depth {
            if Self::is_direct_download(&current) {
                debug!("Direct download file detected: {}", current);
                return Ok(current.to_string());
            }

            let response = match self.handler.send_once(Method::HEAD, &current, None).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Network error resolving {}: {}", current, e);
                    return Ok(current.to_string());
                }
            };

            if !response.status().is_redirection() {
                debug!("URL resolved to: {}", response.url());
                return Ok(response.url().to_string());
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Ok(current.to_string());
            };

            let next = current
                .join(location)
                .map_err(|e| ResolveError::InvalidUrl {
                    reference: location.to_string(),
                    error: e.to_string(),
                })?;
            debug!("Following HTTP redirect ({}): {} -> {}", depth + 1, current, next);
            current = next;
        }

        warn!("Redirect limit reached for URL: {}", current);
        Ok(current.to_string())
    }
}

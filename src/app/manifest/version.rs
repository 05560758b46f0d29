//! Game version strings and discovery from index pages

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::app::client::HttpHandler;
use crate::errors::{DownloadError, ManifestError, ManifestResult};

/// Pattern for 3 or 4 part dotted versions such as `1.105.332.1020`
const VERSION_PATTERN: &str = r"\b\d+\.\d+\.\d+(?:\.\d+)?\b";

/// Dotted numeric version, ordered component by component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    text: String,
    parts: Vec<u64>,
}

impl Version {
    /// Original text form
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Numeric components
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("Invalid version: {}", s))?;
        if parts.is_empty() {
            return Err(format!("Invalid version: {}", s));
        }
        Ok(Self {
            text: s.to_string(),
            parts,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.text.cmp(&other.text)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Extract version strings from link text and hrefs, newest first
pub fn scan_versions(html: &str) -> Vec<Version> {
    let document = Html::parse_document(html);
    let (Ok(links), Ok(pattern)) = (Selector::parse("a"), Regex::new(VERSION_PATTERN)) else {
        return Vec::new();
    };

    let mut found: BTreeSet<Version> = BTreeSet::new();
    for link in document.select(&links) {
        let text: String = link.text().collect();
        let href = link.value().attr("href").unwrap_or("");
        for candidate in [text.as_str(), href] {
            if let Some(m) = pattern.find(candidate) {
                if let Ok(version) = m.as_str().parse::<Version>() {
                    found.insert(version);
                }
            }
        }
    }

    found.into_iter().rev().collect()
}

/// Fetches index pages and scans them for versions
#[derive(Debug, Clone)]
pub struct VersionScanner {
    handler: Arc<HttpHandler>,
}

impl VersionScanner {
    /// Create a scanner using the shared HTTP handler
    pub fn new(handler: Arc<HttpHandler>) -> Self {
        Self { handler }
    }

    /// Fetch an index page and return the versions it links to, newest first
    pub async fn scan(&self, index_url: &str) -> ManifestResult<Vec<Version>> {
        let url = Url::parse(index_url).map_err(|e| ManifestError::InvalidUrl {
            url: index_url.to_string(),
            error: e.to_string(),
        })?;

        let html = self.handler.get_page(&url).await.map_err(|e| match e {
            DownloadError::ServerError { status: 404 } => ManifestError::ManifestNotFound {
                url: index_url.to_string(),
            },
            DownloadError::ServerError { status } => ManifestError::ManifestFetchFailed {
                url: index_url.to_string(),
                status,
            },
            _ => ManifestError::NetworkUnreachable {
                url: index_url.to_string(),
            },
        })?;

        let versions = scan_versions(&html);
        info!("Discovered {} versions from {}", versions.len(), index_url);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ordering() {
        let a: Version = "1.9.0".parse().unwrap();
        let b: Version = "1.10.0".parse().unwrap();
        assert!(a < b);

        let c: Version = "1.105.332".parse().unwrap();
        let d: Version = "1.105.332.1020".parse().unwrap();
        assert!(c < d);
    }

    #[test]
    fn test_invalid_versions() {
        assert!("".parse::<Version>().is_err());
        assert!("1.x.3".parse::<Version>().is_err());
    }

    #[test]
    fn test_scan_versions_from_links() {
        let html = r#"
            <html><body>
              <a href="/patches/1.98.127.1030/">Patch</a>
              <a href="/patches/latest/">1.105.332.1020</a>
              <a href="/patches/1.99.264/">1.99.264</a>
              <a href="/about">About</a>
              <a href="/patches/1.98.127.1030/manifest.json">dup</a>
            </body></html>
        "#;

        let versions: Vec<String> = scan_versions(html)
            .into_iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(
            versions,
            vec!["1.105.332.1020", "1.99.264", "1.98.127.1030"]
        );
    }

    #[test]
    fn test_scan_versions_empty_page() {
        assert!(scan_versions("<html></html>").is_empty());
    }
}

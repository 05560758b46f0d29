//! Manifest model, parsing and retrieval
//!
//! - `types`: the typed [`Manifest`] and [`PatchEntry`] model
//! - `parser`: single validating parse step from JSON text
//! - `fetcher`: [`ManifestSource`] implementations and URL templating
//! - `version`: version ordering and index page discovery

pub mod fetcher;
pub mod parser;
pub mod types;
pub mod version;

pub use fetcher::{
    versioned_manifest_url, FileManifestSource, HttpManifestSource, ManifestSource,
    StaticManifestSource,
};
pub use parser::{parse_manifest, parse_manifest_value};
pub use types::{Category, EntryKind, Manifest, PackState, PackStatus, PatchEntry};
pub use version::{scan_versions, Version, VersionScanner};

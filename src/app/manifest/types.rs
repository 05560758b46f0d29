//! Core types for the manifest model
//!
//! A [`Manifest`] is immutable once parsed: a target version, the ordered
//! list of managed files ([`PatchEntry`]) and the pack dependency map.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app::dependency::DependencyGraph;
use crate::constants::packs;

/// How a managed file is obtained when it is out of date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Download the complete target file
    Full,
    /// Apply a binary delta to a known source file
    Delta,
}

impl EntryKind {
    /// Parse the manifest's `type` field
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(EntryKind::Full),
            "delta" => Some(EntryKind::Delta),
            _ => None,
        }
    }
}

/// Content category of a managed file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Base game content
    Base,
    /// Expansion pack
    Ep,
    /// Game pack
    Gp,
    /// Stuff pack
    Sp,
    /// Kit
    Kit,
    /// Language pack (subject to language filtering)
    Language,
    /// Any other category named by the manifest
    Other(String),
}

impl Category {
    /// Parse a manifest category name
    pub fn parse(value: &str) -> Self {
        match value {
            "Base" => Category::Base,
            "EP" => Category::Ep,
            "GP" => Category::Gp,
            "SP" => Category::Sp,
            "Kit" => Category::Kit,
            "Language" => Category::Language,
            other => Category::Other(other.to_string()),
        }
    }

    /// Manifest spelling of the category
    pub fn as_str(&self) -> &str {
        match self {
            Category::Base => "Base",
            Category::Ep => "EP",
            Category::Gp => "GP",
            Category::Sp => "SP",
            Category::Kit => "Kit",
            Category::Language => "Language",
            Category::Other(name) => name,
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Base
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Category::parse(&name))
    }
}

/// One managed file: its target state and how to obtain it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEntry {
    /// Path relative to the content root
    pub relative_path: String,
    /// Expected digest after update (uppercase hex text)
    pub target_digest: String,
    /// Full download or delta patch
    pub kind: EntryKind,
    /// Owning pack; `Base` when the manifest does not say
    pub pack_id: String,
    /// Content category; `Base` when the manifest does not say
    pub category: Category,
    /// Language code for language pack entries
    pub language: Option<String>,
    /// Digest the delta applies to (required for delta entries)
    pub source_digest: Option<String>,
    /// Full download reference
    pub url: Option<String>,
    /// Delta download reference
    pub patch_url: Option<String>,
    /// Target file size in bytes, when published
    pub size: Option<u64>,
    /// Delta size in bytes, when published
    pub patch_size: Option<u64>,
}

impl PatchEntry {
    /// Whether this entry belongs to the reserved base pack
    pub fn is_base(&self) -> bool {
        self.pack_id == packs::BASE_PACK
    }
}

/// Whether a pack's folder exists under the content root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackState {
    Installed,
    Missing,
}

/// Install state of one optional pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackStatus {
    pub pack_id: String,
    pub category: Category,
    /// Folder checked, relative to the content root
    pub folder: String,
    pub status: PackState,
}

/// Parsed manifest document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub(crate) target_version: Option<String>,
    pub(crate) files: Vec<PatchEntry>,
    pub(crate) dependencies: BTreeMap<String, Vec<String>>,
}

impl Manifest {
    /// Build a manifest from already-validated parts
    pub fn new(
        target_version: Option<String>,
        files: Vec<PatchEntry>,
        dependencies: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            target_version,
            files,
            dependencies,
        }
    }

    /// Version the manifest describes
    pub fn target_version(&self) -> Option<&str> {
        self.target_version.as_deref()
    }

    /// Managed files in manifest order
    pub fn files(&self) -> &[PatchEntry] {
        &self.files
    }

    /// Pack dependency map; packs without an entry have no extra requirements
    pub fn dependencies(&self) -> &BTreeMap<String, Vec<String>> {
        &self.dependencies
    }

    /// Entries grouped by category, each group in manifest order
    pub fn categorized(&self) -> BTreeMap<Category, Vec<&PatchEntry>> {
        let mut grouped: BTreeMap<Category, Vec<&PatchEntry>> = BTreeMap::new();
        for entry in &self.files {
            grouped
                .entry(entry.category.clone())
                .or_default()
                .push(entry);
        }
        grouped
    }

    /// Every pack id referenced by a file entry
    pub fn available_packs(&self) -> BTreeSet<String> {
        self.files.iter().map(|e| e.pack_id.clone()).collect()
    }

    /// Install state of every non-base pack, by pack id
    ///
    /// A pack counts as installed when a folder named after its id exists
    /// directly under `content_root`. The category is taken from the pack's
    /// first entry.
    pub fn pack_status(&self, content_root: &Path) -> Vec<PackStatus> {
        let mut first_category: BTreeMap<&str, &Category> = BTreeMap::new();
        for entry in self.files.iter().filter(|e| !e.is_base()) {
            first_category
                .entry(entry.pack_id.as_str())
                .or_insert(&entry.category);
        }

        first_category
            .into_iter()
            .map(|(pack_id, category)| PackStatus {
                pack_id: pack_id.to_string(),
                category: category.clone(),
                folder: pack_id.to_string(),
                status: if content_root.join(pack_id).is_dir() {
                    PackState::Installed
                } else {
                    PackState::Missing
                },
            })
            .collect()
    }

    /// Build a fresh dependency graph from the manifest's dependency map
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_map(&self.dependencies)
    }
}

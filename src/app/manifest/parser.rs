//! Validating manifest parser
//!
//! Turns manifest text into the typed [`Manifest`] model in a single pass so
//! schema mistakes fail here rather than deep inside planning.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use super::types::{Category, EntryKind, Manifest, PatchEntry};
use crate::constants::packs;
use crate::errors::{ManifestError, ManifestResult};

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    patch: Option<RawPatchSection>,
    #[serde(default)]
    files: Option<Vec<RawPatchEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPatchSection {
    #[serde(default)]
    files: Vec<RawPatchEntry>,
}

#[derive(Debug, Deserialize)]
struct RawPatchEntry {
    name: Option<String>,
    #[serde(rename = "MD5_to")]
    md5_to: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    pack_id: Option<String>,
    category: Option<String>,
    language: Option<String>,
    #[serde(rename = "MD5_from")]
    md5_from: Option<String>,
    url: Option<String>,
    patch_url: Option<String>,
    size: Option<u64>,
    patch_size: Option<u64>,
}

/// Parse manifest text
///
/// Fails with `ParseError` when the text is not well-formed JSON and with
/// `InvalidFormat` when the top level is not an object.
pub fn parse_manifest(text: &str) -> ManifestResult<Manifest> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        error!("Invalid JSON in manifest: {}", e);
        ManifestError::ParseError(e)
    })?;
    parse_manifest_value(value)
}

/// Parse an already-decoded JSON document
pub fn parse_manifest_value(value: Value) -> ManifestResult<Manifest> {
    if !value.is_object() {
        return Err(ManifestError::InvalidFormat {
            reason: "Manifest must be a JSON object".to_string(),
        });
    }

    let raw: RawManifest =
        serde_json::from_value(value).map_err(|e| ManifestError::InvalidFormat {
            reason: e.to_string(),
        })?;

    // Files live under `patch.files`; a bare top-level `files` list is accepted too
    let raw_files = match (raw.patch, raw.files) {
        (Some(section), _) => section.files,
        (None, Some(files)) => files,
        (None, None) => Vec::new(),
    };

    let files = raw_files
        .into_iter()
        .enumerate()
        .map(|(index, raw)| validate_entry(index, raw))
        .collect::<ManifestResult<Vec<_>>>()?;

    debug!(
        "Parsed manifest version {:?}: {} files, {} dependency entries",
        raw.version,
        files.len(),
        raw.dependencies.len()
    );

    Ok(Manifest::new(raw.version, files, raw.dependencies))
}

fn validate_entry(index: usize, raw: RawPatchEntry) -> ManifestResult<PatchEntry> {
    let missing = |field: &str| ManifestError::MissingField {
        index,
        field: field.to_string(),
    };

    let relative_path = raw.name.ok_or_else(|| missing("name"))?;
    if relative_path.is_empty() {
        return Err(ManifestError::InvalidEntry {
            index,
            reason: "empty file name".to_string(),
        });
    }

    let target_digest = raw.md5_to.ok_or_else(|| missing("MD5_to"))?.to_uppercase();
    let kind_text = raw.kind.ok_or_else(|| missing("type"))?;
    let kind = EntryKind::parse(&kind_text).ok_or_else(|| ManifestError::InvalidEntry {
        index,
        reason: format!("unknown type '{}'", kind_text),
    })?;

    let source_digest = raw.md5_from.map(|d| d.to_uppercase());

    match kind {
        EntryKind::Full => {
            if raw.url.is_none() {
                return Err(missing("url"));
            }
        }
        EntryKind::Delta => {
            if source_digest.is_none() {
                return Err(missing("MD5_from"));
            }
            if raw.patch_url.is_none() {
                return Err(missing("patch_url"));
            }
        }
    }

    Ok(PatchEntry {
        relative_path,
        target_digest,
        kind,
        pack_id: raw.pack_id.unwrap_or_else(|| packs::BASE_PACK.to_string()),
        category: raw
            .category
            .as_deref()
            .map(Category::parse)
            .unwrap_or_default(),
        language: raw.language,
        source_digest,
        url: raw.url,
        patch_url: raw.patch_url,
        size: raw.size,
        patch_size: raw.patch_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": "1.105.332.1020",
        "dependencies": {"GP01": ["EP01"], "EP01": ["Base"]},
        "patch": {
            "files": [
                {"name": "Game/Bin/TS4.exe", "MD5_to": "aaaa", "type": "full", "url": "http://x/ts4"},
                {"name": "EP01/pack.package", "MD5_to": "BBBB", "type": "delta",
                 "MD5_from": "cccc", "patch_url": "http://x/ep01.delta", "url": "http://x/ep01",
                 "pack_id": "EP01", "category": "EP"},
                {"name": "Data/Strings_FR.package", "MD5_to": "DDDD", "type": "full",
                 "url": "http://x/fr", "category": "Language", "language": "fr_FR"}
            ]
        }
    }"#;

    #[test]
    fn test_parse_full_document() {
        let manifest = parse_manifest(SAMPLE).unwrap();
        assert_eq!(manifest.target_version(), Some("1.105.332.1020"));
        assert_eq!(manifest.files().len(), 3);
        assert_eq!(manifest.dependencies()["GP01"], vec!["EP01".to_string()]);

        let exe = &manifest.files()[0];
        assert_eq!(exe.target_digest, "AAAA");
        assert_eq!(exe.pack_id, "Base");
        assert_eq!(exe.category, Category::Base);

        let delta = &manifest.files()[1];
        assert_eq!(delta.kind, EntryKind::Delta);
        assert_eq!(delta.source_digest.as_deref(), Some("CCCC"));

        let lang = &manifest.files()[2];
        assert_eq!(lang.category, Category::Language);
        assert_eq!(lang.language.as_deref(), Some("fr_FR"));
    }

    #[test]
    fn test_top_level_files_accepted() {
        let text = r#"{"files":[{"name":"f.txt","MD5_to":"ABCD","type":"full","url":"http://x/f.txt"}]}"#;
        let manifest = parse_manifest(text).unwrap();
        assert_eq!(manifest.files().len(), 1);
        assert_eq!(manifest.target_version(), None);
        assert!(manifest.dependencies().is_empty());
    }

    #[test]
    fn test_malformed_text_is_parse_error() {
        let result = parse_manifest("{ not json");
        assert!(matches!(result, Err(ManifestError::ParseError(_))));
    }

    #[test]
    fn test_non_object_is_invalid_format() {
        let result = parse_manifest("[1, 2, 3]");
        assert!(matches!(result, Err(ManifestError::InvalidFormat { .. })));
    }

    #[test]
    fn test_delta_without_source_digest_rejected() {
        let text = r#"{"files":[{"name":"f","MD5_to":"A","type":"delta","patch_url":"http://x/p"}]}"#;
        let result = parse_manifest(text);
        assert!(matches!(
            result,
            Err(ManifestError::MissingField { field, .. }) if field == "MD5_from"
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let text = r#"{"files":[{"name":"f","MD5_to":"A","type":"rsync","url":"http://x"}]}"#;
        assert!(matches!(
            parse_manifest(text),
            Err(ManifestError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_wrong_dependency_shape_is_invalid_format() {
        let text = r#"{"dependencies": {"GP01": "EP01"}}"#;
        assert!(matches!(
            parse_manifest(text),
            Err(ManifestError::InvalidFormat { .. })
        ));
    }
}

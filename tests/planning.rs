//! Planning against real directories through the update manager

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use content_updater::app::{OperationKind, ProgressEvent};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use common::{hex, manager, recording_sink, MapAgent};

const SINGLE_FULL: &str =
    r#"{"files":[{"name":"f.txt","MD5_to":"ABCD","type":"full","url":"http://x/f.txt"}]}"#;

#[tokio::test]
async fn test_empty_root_plans_full_download() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let manager = manager(&root, &data, SINGLE_FULL, Arc::new(MapAgent::default()));
    let (sink, events) = recording_sink();

    let ops = assert_ok!(manager.plan(&manager.plan_request(None, None), &sink).await);

    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::DownloadFull);
    assert_eq!(ops[0].relative_path, "f.txt");
    assert_eq!(ops[0].target_digest, "ABCD");
    assert_eq!(ops[0].url.as_deref(), Some("http://x/f.txt"));
    assert_eq!(events.lock().unwrap()[0], ProgressEvent::FetchingManifest);
}

#[tokio::test]
async fn test_matching_file_is_noop_and_planning_is_repeatable() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let body = b"current content";
    std::fs::write(root.path().join("f.txt"), body).unwrap();

    let text = format!(
        r#"{{"files":[{{"name":"f.txt","MD5_to":"{}","type":"full","url":"http://x/f.txt"}}]}}"#,
        hex(body).to_lowercase()
    );
    let manager = manager(&root, &data, &text, Arc::new(MapAgent::default()));
    let request = manager.plan_request(None, None);

    let (sink, _) = recording_sink();
    let first = manager.plan(&request, &sink).await.unwrap();
    let second = manager.plan(&request, &sink).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert!(first.iter().all(|op| op.kind == OperationKind::NoOp));
}

#[tokio::test]
async fn test_delta_classification() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let old = b"old version";
    std::fs::write(root.path().join("a.package"), old).unwrap();
    std::fs::write(root.path().join("b.package"), b"locally modified").unwrap();

    let text = format!(
        r#"{{"patch":{{"files":[
            {{"name":"a.package","MD5_to":"{to}","MD5_from":"{from}","type":"delta",
              "patch_url":"http://x/a.delta","url":"http://x/a.package"}},
            {{"name":"b.package","MD5_to":"{to}","MD5_from":"{from}","type":"delta",
              "patch_url":"http://x/b.delta","url":"http://x/b.package"}}
        ]}}}}"#,
        to = hex(b"new version"),
        from = hex(old)
    );
    let manager = manager(&root, &data, &text, Arc::new(MapAgent::default()));
    let (sink, _) = recording_sink();
    let ops = manager
        .plan(&manager.plan_request(None, None), &sink)
        .await
        .unwrap();

    let patch = ops.iter().find(|o| o.relative_path == "a.package").unwrap();
    assert_eq!(patch.kind, OperationKind::PatchDelta);
    assert_eq!(patch.source_digest.as_deref(), Some(hex(old).as_str()));
    assert_eq!(patch.target_digest, hex(b"new version"));
    assert_eq!(patch.patch_url.as_deref(), Some("http://x/a.delta"));

    let fallback = ops.iter().find(|o| o.relative_path == "b.package").unwrap();
    assert_eq!(fallback.kind, OperationKind::DownloadFull);
    assert_eq!(fallback.url.as_deref(), Some("http://x/b.package"));
    assert!(fallback.reason.to_lowercase().contains("source hash mismatch"));
}

#[tokio::test]
async fn test_language_and_pack_filtering() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let text = r#"{
        "dependencies": {"GP01": ["EP01"], "EP01": ["Base"]},
        "files": [
            {"name":"Game/Bin/game.exe","MD5_to":"01","type":"full","url":"http://x/1"},
            {"name":"Data/Strings_ENG_US.package","MD5_to":"02","type":"full","url":"http://x/2",
             "category":"Language","language":"en_US"},
            {"name":"Data/Strings_FRE_FR.package","MD5_to":"03","type":"full","url":"http://x/3",
             "category":"Language","language":"fr_FR"},
            {"name":"EP01/pack.package","MD5_to":"04","type":"full","url":"http://x/4",
             "pack_id":"EP01","category":"EP"},
            {"name":"GP01/pack.package","MD5_to":"05","type":"full","url":"http://x/5",
             "pack_id":"GP01","category":"GP"},
            {"name":"SP01/pack.package","MD5_to":"06","type":"full","url":"http://x/6",
             "pack_id":"SP01","category":"SP"}
        ]
    }"#;
    let manager = manager(&root, &data, text, Arc::new(MapAgent::default()));
    let (sink, _) = recording_sink();

    let selected: BTreeSet<String> = ["GP01".to_string()].into_iter().collect();
    let ops = manager
        .plan(&manager.plan_request(Some(selected), None), &sink)
        .await
        .unwrap();
    let files: Vec<&str> = ops.iter().map(|o| o.relative_path.as_str()).collect();

    assert_eq!(
        files,
        vec![
            "Game/Bin/game.exe",
            "Data/Strings_ENG_US.package",
            "EP01/pack.package",
            "GP01/pack.package",
        ]
    );
}

#[tokio::test]
async fn test_malformed_manifest_reports_error_event() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let manager = manager(&root, &data, "{not json", Arc::new(MapAgent::default()));
    let (sink, events) = recording_sink();

    assert_err!(manager.plan(&manager.plan_request(None, None), &sink).await);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ProgressEvent::Error { .. })));
}

//! Restore point round trips through the update manager

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{manager, MapAgent};

const EMPTY: &str = r#"{"files":[]}"#;

#[tokio::test]
async fn test_restore_point_round_trip() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("Data/Client")).unwrap();
    std::fs::write(root.path().join("A.package"), b"first file").unwrap();
    std::fs::write(root.path().join("Data/Client/B.package"), vec![7u8; 4096]).unwrap();
    let manager = manager(&root, &data, EMPTY, Arc::new(MapAgent::default()));

    let name = manager
        .create_backup(vec![
            "A.package".to_string(),
            "Data/Client/B.package".to_string(),
            "missing.package".to_string(),
        ])
        .await
        .unwrap();
    assert!(name.ends_with(".zip"));
    assert_eq!(manager.list_backups(), vec![name.clone()]);

    std::fs::remove_file(root.path().join("A.package")).unwrap();
    std::fs::remove_file(root.path().join("Data/Client/B.package")).unwrap();

    assert!(manager.restore_backup(&name).await);
    assert_eq!(
        std::fs::read(root.path().join("A.package")).unwrap(),
        b"first file"
    );
    assert_eq!(
        std::fs::read(root.path().join("Data/Client/B.package")).unwrap(),
        vec![7u8; 4096]
    );
    assert!(!root.path().join("missing.package").exists());
}

#[tokio::test]
async fn test_restore_of_unknown_point_returns_false() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let manager = manager(&root, &data, EMPTY, Arc::new(MapAgent::default()));

    assert!(!manager.restore_backup("AutoPatch_Pre_19700101_000000.zip").await);
    assert!(!manager.restore_backup("../outside.zip").await);
    assert!(manager.list_backups().is_empty());
}

#[tokio::test]
async fn test_recovery_with_missing_restore_point_keeps_lock() {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(root.path().join("update.lock"), b"").unwrap();
    let manager = manager(&root, &data, EMPTY, Arc::new(MapAgent::default()));

    assert!(!manager.run_recovery(Some("nope.zip")).await);
    assert!(manager.check_interrupted());
}

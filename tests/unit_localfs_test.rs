// tests/unit_localfs_test.rs

use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use unicon::core::UniconError;
use unicon::core::events::EventBroadcaster;
use unicon::core::handlers::localfs::{LocalFsHandler, confine};
use unicon::core::handlers::{HandlerContext, HandlerSettings, ProtocolHandler};
use unicon::core::model::ProtocolType;

fn handler(root: &Path) -> LocalFsHandler {
    LocalFsHandler::new(HandlerContext {
        connection_id: "fs-1".into(),
        protocol: ProtocolType::LocalFs,
        config: json!({ "root": root.to_str().unwrap() }),
        events: EventBroadcaster::default(),
        settings: Arc::new(HandlerSettings::default()),
    })
}

async fn connected(dir: &TempDir) -> LocalFsHandler {
    let mut h = handler(dir.path());
    h.connect().await.unwrap();
    h
}

fn names(listing: &Value) -> Vec<&str> {
    listing
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect()
}

#[test]
fn test_confine_stays_under_root() {
    let root = Path::new("/srv/data");
    assert_eq!(confine(root, "").unwrap(), root);
    assert_eq!(confine(root, "a/b/../c").unwrap(), root.join("a/c"));
    assert_eq!(confine(root, "/etc/passwd").unwrap(), root.join("etc/passwd"));
    assert_eq!(confine(root, "a/..").unwrap(), root);

    for escape in ["..", "../etc", "a/../../b", "./../x"] {
        let err = confine(root, escape).unwrap_err();
        assert!(err.to_string().contains("Path escapes root"), "{escape}: {err}");
    }
}

#[tokio::test]
async fn test_connect_requires_root() {
    let mut h = LocalFsHandler::new(HandlerContext {
        connection_id: "fs-1".into(),
        protocol: ProtocolType::LocalFs,
        config: json!({}),
        events: EventBroadcaster::default(),
        settings: Arc::new(HandlerSettings::default()),
    });
    assert!(matches!(h.connect().await, Err(UniconError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_connect_creates_missing_root() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("new-root");
    let mut h = handler(&root);
    let detail = h.connect().await.unwrap();
    assert!(root.is_dir());
    assert!(detail["root"].as_str().unwrap().ends_with("new-root"));
}

#[tokio::test]
async fn test_invoke_before_connect() {
    let dir = TempDir::new().unwrap();
    let mut h = handler(dir.path());
    let err = h.invoke("list", json!({})).await.unwrap_err();
    assert!(matches!(err, UniconError::NotConnected(_)));
}

#[tokio::test]
async fn test_upload_list_download() {
    let dir = TempDir::new().unwrap();
    let mut h = connected(&dir).await;

    let up = h
        .invoke("upload", json!({ "path": "docs/readme.txt", "base64": "aGVsbG8=" }))
        .await
        .unwrap();
    assert_eq!(up["size"], 5);
    assert_eq!(std::fs::read(dir.path().join("docs/readme.txt")).unwrap(), b"hello");

    h.invoke("mkdir", json!({ "path": "archive/2024" })).await.unwrap();

    let root = h.invoke("list", json!({})).await.unwrap();
    assert_eq!(names(&root), vec!["archive", "docs"]);
    assert_eq!(root[0]["isDirectory"], true);
    assert_eq!(root[0]["type"], "d");

    let docs = h.invoke("list", json!({ "path": "docs" })).await.unwrap();
    assert_eq!(docs[0]["size"], 5);
    assert_eq!(docs[0]["type"], "f");
    assert!(docs[0]["modifiedAt"].is_string());

    let down = h
        .invoke("download", json!({ "path": "docs/readme.txt" }))
        .await
        .unwrap();
    assert_eq!(down, json!({ "base64": "aGVsbG8=", "size": 5 }));
}

#[tokio::test]
async fn test_upload_without_overwrite_keeps_existing_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"old").unwrap();
    let mut h = connected(&dir).await;

    let err = h
        .invoke("upload", json!({ "path": "a.txt", "base64": "bmV3", "overwrite": false }))
        .await;
    assert!(err.is_err());
    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"old");

    h.invoke("upload", json!({ "path": "a.txt", "base64": "bmV3" }))
        .await
        .unwrap();
    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_upload_rejects_empty_or_bad_base64() {
    let dir = TempDir::new().unwrap();
    let mut h = connected(&dir).await;
    assert!(
        h.invoke("upload", json!({ "path": "a", "base64": "" }))
            .await
            .is_err()
    );
    assert!(
        h.invoke("upload", json!({ "path": "a", "base64": "***" }))
            .await
            .is_err()
    );
    assert!(!dir.path().join("a").exists());
}

#[tokio::test]
async fn test_rename_and_remove() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("logs/old")).unwrap();
    std::fs::write(dir.path().join("logs/old/x.log"), b"x").unwrap();
    std::fs::write(dir.path().join("report.csv"), b"1,2").unwrap();
    let mut h = connected(&dir).await;

    h.invoke("rename", json!({ "from": "report.csv", "to": "logs/report.csv" }))
        .await
        .unwrap();
    assert!(dir.path().join("logs/report.csv").exists());
    assert!(!dir.path().join("report.csv").exists());

    // Directories are removed recursively; a missing path is not an error.
    h.invoke("remove", json!({ "path": "logs/old" })).await.unwrap();
    assert!(!dir.path().join("logs/old").exists());
    h.invoke("remove", json!({ "path": "logs/old" })).await.unwrap();
}

#[tokio::test]
async fn test_root_cannot_be_removed_or_escaped() {
    let dir = TempDir::new().unwrap();
    let mut h = connected(&dir).await;

    for path in [".", "", "sub/.."] {
        let err = h.invoke("remove", json!({ "path": path })).await.unwrap_err();
        assert!(err.to_string().contains("root"), "{path}: {err}");
    }
    assert!(dir.path().exists());

    let err = h
        .invoke("download", json!({ "path": "../../etc/passwd" }))
        .await
        .unwrap_err();
    assert!(matches!(err, UniconError::InvalidParams(_)));
}

#[tokio::test]
async fn test_missing_path_parameter() {
    let dir = TempDir::new().unwrap();
    let mut h = connected(&dir).await;
    let err = h.invoke("download", json!({})).await.unwrap_err();
    assert!(matches!(err, UniconError::InvalidParams(_)));
}

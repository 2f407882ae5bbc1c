// tests/unit_store_test.rs

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use unicon::core::UniconError;
use unicon::core::model::{Connection, ConnectionStatus};
use unicon::core::store::{
    ConnectionStore, JsonFileStore, MemoryStore, SqliteStore, StoreBackend, open_store,
};

/// The behaviour every backend must share.
async fn exercise(store: Arc<dyn ConnectionStore>) {
    assert!(store.list().await.unwrap().is_empty());

    let plc = Connection::new("plc", "opcua", json!({ "endpointUrl": "opc.tcp://plc:4840" }), None);
    let db = Connection::new("db", "sql", json!({ "driver": "sqlite" }), Some("ws-1".into()));
    store.upsert(plc.clone()).await.unwrap();
    store.upsert(db.clone()).await.unwrap();

    let listed = store.list().await.unwrap();
    assert_eq!(
        listed.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["plc", "db"]
    );
    let fetched = store.get(&db.id).await.unwrap().unwrap();
    assert_eq!(fetched.workspace_id.as_deref(), Some("ws-1"));
    assert_eq!(fetched.config["driver"], "sqlite");
    assert_eq!(fetched.protocol_type, "sql");

    let mut renamed = plc.clone();
    renamed.name = "line-3 plc".into();
    store.upsert(renamed).await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 2);
    assert_eq!(store.get(&plc.id).await.unwrap().unwrap().name, "line-3 plc");

    store.set_status(&plc.id, ConnectionStatus::Connected).await.unwrap();
    assert_eq!(
        store.get(&plc.id).await.unwrap().unwrap().status,
        ConnectionStatus::Connected
    );
    store.set_status("ghost", ConnectionStatus::Connected).await.unwrap();

    assert!(store.delete(&db.id).await.unwrap());
    assert!(!store.delete(&db.id).await.unwrap());
    assert!(store.get(&db.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_store() {
    exercise(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_sqlite_in_memory_store() {
    exercise(Arc::new(SqliteStore::in_memory().unwrap())).await;
}

#[tokio::test]
async fn test_json_file_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("connections.json");
    exercise(Arc::new(JsonFileStore::open(&path).await.unwrap())).await;
    assert!(path.exists());
}

#[tokio::test]
async fn test_json_file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("connections.json");

    let connection = Connection::new("sign", "ntcip-vms", json!({ "host": "10.1.1.5" }), None);
    {
        let store = JsonFileStore::open(&path).await.unwrap();
        store.upsert(connection.clone()).await.unwrap();
    }

    let reopened = JsonFileStore::open(&path).await.unwrap();
    let loaded = reopened.get(&connection.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "sign");
    assert_eq!(loaded.config["host"], "10.1.1.5");

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["connections"][0]["type"], "ntcip-vms");
    // No temp files are left beside the store.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unicon.db");

    let connection = Connection::new("box", "ssh", json!({ "host": "jump" }), None);
    {
        let store = SqliteStore::open(&path).await.unwrap();
        store.upsert(connection.clone()).await.unwrap();
    }
    let reopened = SqliteStore::open(&path).await.unwrap();
    assert_eq!(
        reopened.get(&connection.id).await.unwrap().unwrap().config["host"],
        "jump"
    );
}

#[tokio::test]
async fn test_corrupt_file_is_a_storage_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("connections.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let err = JsonFileStore::open(&path).await.unwrap_err();
    assert!(matches!(err, UniconError::Storage(_)), "{err:?}");
}

#[tokio::test]
async fn test_blank_file_opens_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("connections.json");
    std::fs::write(&path, b"  \n").unwrap();

    let store = JsonFileStore::open(&path).await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_store_picks_backend() {
    let dir = TempDir::new().unwrap();
    for (backend, file) in [
        (StoreBackend::File, "a.json"),
        (StoreBackend::Sqlite, "b.db"),
        (StoreBackend::Memory, "unused"),
    ] {
        let store = open_store(backend, &dir.path().join(file)).await.unwrap();
        store
            .upsert(Connection::new("x", "rest", json!({}), None))
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
    assert!(!dir.path().join("unused").exists());
}

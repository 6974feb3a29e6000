// Storage adapter: layout, atomic replacement, round-trips

use tempfile::tempdir;

use super::common::sample_document;
use crate::services::storage::MetadataStore;
use crate::utils::ApiError;

#[tokio::test]
async fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new(dir.path());

    let document = sample_document("proddb", "public", "users");
    let path = store.write(&document).await.unwrap();
    assert!(path.ends_with("proddb/public/users.json"));

    let loaded = store.read("proddb", "public", "users").await.unwrap();
    assert_eq!(loaded.database_name, document.database_name);
    assert_eq!(loaded.columns.len(), document.columns.len());
    assert_eq!(loaded.table_insights.domain, document.table_insights.domain);

    // equal modulo formatting
    assert_eq!(
        serde_json::to_value(&loaded).unwrap(),
        serde_json::to_value(&document).unwrap()
    );
}

#[tokio::test]
async fn rewrite_replaces_the_document_whole() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new(dir.path());

    let mut document = sample_document("db", "s", "t");
    store.write(&document).await.unwrap();

    document.description = "second version".to_string();
    store.write(&document).await.unwrap();

    let loaded = store.read("db", "s", "t").await.unwrap();
    assert_eq!(loaded.description, "second version");

    // no temp files linger next to the document
    let schema_dir = dir.path().join("db").join("s");
    let leftovers: Vec<_> = std::fs::read_dir(schema_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn path_components_are_sanitized() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new(dir.path());

    let document = sample_document("my/db", "sch:ema", "ta*ble");
    let path = store.write(&document).await.unwrap();
    assert!(path.ends_with("my_db/sch_ema/ta_ble.json"));

    // lookups sanitize the same way
    assert!(store.read("my/db", "sch:ema", "ta*ble").await.is_ok());
}

#[tokio::test]
async fn missing_documents_are_not_found() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new(dir.path());

    let err = store.read("db", "s", "missing").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let err = store.delete("db", "s", "missing").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn list_returns_entries_per_database() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new(dir.path());

    store.write(&sample_document("db", "public", "users")).await.unwrap();
    store.write(&sample_document("db", "public", "orders")).await.unwrap();
    store.write(&sample_document("db", "analytics", "events")).await.unwrap();
    store.write(&sample_document("other", "public", "misc")).await.unwrap();

    let entries = store.list("db").await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.database_name == "db"));
    assert!(entries.iter().any(|e| e.table_name == "events"));

    assert!(store.list("unknown").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_removes_the_document() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new(dir.path());

    store.write(&sample_document("db", "s", "t")).await.unwrap();
    assert!(store.exists("db", "s", "t").await);
    store.delete("db", "s", "t").await.unwrap();
    assert!(!store.exists("db", "s", "t").await);
}

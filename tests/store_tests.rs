//! Integration tests for the canonical document file

mod common;

use common::{CAVES, catalog_bytes, config, open, resources, seeded};
use heritagedb::{DbError, Document, DocumentStore, DurabilityMode, Gid, Schema, Value};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn heritage_schema() -> Arc<Schema> {
    Arc::new(Schema::load(resources().join("schema/heritage.schema")).unwrap())
}

#[tokio::test]
async fn test_round_trip_preserves_graph() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let loaded = engine.store().load().await.unwrap();
    engine.store().save(&loaded).await.unwrap();
    let reloaded = engine.store().load().await.unwrap();
    assert_eq!(loaded, reloaded);

    let statue = reloaded.node(&Gid::new("statue-hongbian")).unwrap();
    assert_eq!(statue.attribute("conservationStatus").unwrap(), &Value::Enum("monitored".into()));
    assert_eq!(statue.attribute("catalogNumber").unwrap(), &Value::Integer(17));
    assert_eq!(statue.container().unwrap().gid(), &Gid::new("cave-16"));
    let related: Vec<_> = statue
        .linked("related")
        .unwrap()
        .iter()
        .map(|node| node.gid().clone())
        .collect();
    assert_eq!(related, vec![Gid::new("mural-guanyin")]);
}

#[tokio::test]
async fn test_file_format_is_tagged_json() {
    let dir = TempDir::new().unwrap();
    seeded(&dir).await;

    let file: serde_json::Value = serde_json::from_slice(&catalog_bytes(&dir)).unwrap();
    assert_eq!(file["format_version"], 1);
    assert_eq!(file["schema"], "http://heritage.example/catalog/1.0");
    let nodes = file["nodes"].as_array().unwrap();
    assert_eq!(nodes[0]["type"], "Catalog");
    assert_eq!(nodes[0]["gid"], file["root"]);

    let cave = nodes.iter().find(|n| n["gid"] == "cave-16").unwrap();
    assert_eq!(cave["type"], "Cave");
    assert_eq!(
        cave["attributes"]["name"],
        json!({ "type": "Text", "value": "Cave 16" })
    );
    assert_eq!(cave["links"]["exhibits"], json!(["statue-hongbian"]));
}

#[tokio::test]
async fn test_corrupt_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let engine = open(config(&dir)).await;
    std::fs::write(dir.path().join("catalog.json"), b"{ \"format_version\": 1, ").unwrap();

    let err = engine.execute(CAVES, "getAllCaves", vec![]).await.unwrap_err();
    assert!(matches!(err, DbError::CorruptDocument(_)));
    // Content exists, so bootstrap must not overwrite it.
    assert!(!engine.initialize_if_empty().await.unwrap());
}

#[tokio::test]
async fn test_foreign_namespace_is_schema_mismatch() {
    let dir = TempDir::new().unwrap();
    seeded(&dir).await;

    let path = dir.path().join("catalog.json");
    let mut file: serde_json::Value = serde_json::from_slice(&catalog_bytes(&dir)).unwrap();
    file["schema"] = json!("http://other.example/1.0");
    std::fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();

    let store = DocumentStore::open(&path, heritage_schema(), DurabilityMode::Async).unwrap();
    assert!(matches!(store.load().await, Err(DbError::SchemaMismatch(_))));
}

#[tokio::test]
async fn test_empty_file_bootstraps() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("catalog.json"), b"").unwrap();
    let engine = open(config(&dir)).await;

    assert!(engine.store().is_empty().await.unwrap());
    assert!(engine.initialize_if_empty().await.unwrap());
    assert!(!engine.store().is_empty().await.unwrap());
}

#[test]
fn test_stores_for_one_path_share_a_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");
    let first = DocumentStore::open(&path, heritage_schema(), DurabilityMode::Sync).unwrap();
    let second = DocumentStore::open(
        dir.path().join(".").join("catalog.json"),
        heritage_schema(),
        DurabilityMode::Sync,
    )
    .unwrap();

    tokio_test::block_on(async {
        first
            .save(&Document::new(heritage_schema()))
            .await
            .unwrap();
        second.load().await.unwrap();
    });

    let stats = first.lock_stats();
    assert_eq!(stats, second.lock_stats());
    assert_eq!(stats.write_sections, 1);
    assert_eq!(stats.read_sections, 1);
    assert_eq!(stats.violations, 0);
}

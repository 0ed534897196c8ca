#![allow(dead_code)]

use heritagedb::{CatalogEngine, EngineConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CAVES: &str = "cave/caves.ops";
pub const DEFECTS: &str = "defect/defects.ops";
pub const EXHIBITS: &str = "exhibit/exhibits.ops";

pub fn resources() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("resources")
}

/// Shipped schema and scripts, catalog file inside `dir`.
pub fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig::from_root(resources()).document_path(dir.path().join("catalog.json"))
}

pub async fn open(config: EngineConfig) -> CatalogEngine {
    CatalogEngine::open(config).await.unwrap()
}

/// Engine over a freshly bootstrapped catalog.
pub async fn seeded(dir: &TempDir) -> CatalogEngine {
    let engine = open(config(dir)).await;
    assert!(engine.initialize_if_empty().await.unwrap());
    engine
}

pub fn catalog_bytes(dir: &TempDir) -> Vec<u8> {
    std::fs::read(dir.path().join("catalog.json")).unwrap()
}

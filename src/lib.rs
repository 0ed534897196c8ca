// ============================================================================
// HeritageDB Library
// ============================================================================

//! Schema-typed document engine for a heritage artifact catalog.
//!
//! A catalog is one [`Document`]: a rooted graph of typed nodes that
//! conforms to a [`Schema`] and lives in a single JSON file. Clients never
//! touch the graph directly; they run named operations from operation
//! scripts through a [`CatalogEngine`], which loads the file, dispatches the
//! operation, saves the file when the operation mutates, and disposes the
//! in-memory copy.
//!
//! ```no_run
//! use heritagedb::{CatalogEngine, CaveRecord, EngineConfig, Value};
//!
//! # async fn run() -> heritagedb::Result<()> {
//! let engine = CatalogEngine::open(EngineConfig::from_root("resources")).await?;
//! engine.initialize_if_empty().await?;
//!
//! let caves: Vec<CaveRecord> = engine
//!     .fetch_records("cave/caves.ops", "getAllCaves", vec![])
//!     .await?;
//! engine
//!     .execute("cave/caves.ops", "updateCaveLabel", vec![
//!         Value::from(caves[0].gid.as_str()),
//!         Value::from("Library Cave"),
//!     ])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod document;
pub mod executor;
pub mod facade;
pub mod mapper;
pub mod prelude;
pub mod schema;
pub mod script;
pub mod storage;

// Re-export main types for convenience
pub use core::{DbError, Gid, Result, Value};
pub use document::{Document, NodeRef};
pub use executor::{MutationPolicy, OperationRegistry, ScriptLoading};
pub use facade::{CatalogEngine, EngineConfig, EngineStats, OperationCall};
pub use mapper::{
    AssetReferenceRecord, CaveRecord, CoordinatesRecord, DefectRecord,
    EnvironmentConditionRecord, ExhibitRecord, InscriptionRecord, MuralRecord, PaintingRecord,
    ParameterRecord, Record, StatueRecord, to_record,
};
pub use schema::Schema;
pub use storage::{DocumentStore, DurabilityMode, LockStats};

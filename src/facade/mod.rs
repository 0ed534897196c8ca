mod config;
mod engine;

pub use config::{
    BootstrapOperation, DEFAULT_BOOTSTRAP_OPERATION, DEFAULT_BOOTSTRAP_SCRIPT,
    DEFAULT_DOCUMENT_PATH, DEFAULT_SCHEMA_PATH, DEFAULT_SCRIPTS_ROOT, EngineConfig,
};
pub use engine::{CatalogEngine, EngineStats, OperationCall};

//! Entry points grouped by how close to the document they sit.
//!
//! `engine` is what application code normally needs. `advanced` exposes the
//! pieces the engine is built from, for tools that drive them directly.

pub mod engine {
    pub use crate::mapper::{Record, to_record};
    pub use crate::{
        CatalogEngine, DbError, EngineConfig, Gid, OperationCall, Result, Value, record,
    };
}

pub mod advanced {
    pub use crate::document::{Document, NodeRef};
    pub use crate::executor::{Dispatcher, MutationPolicy, OperationRegistry, ScriptLoading};
    pub use crate::schema::Schema;
    pub use crate::script::{DirectoryScripts, Script, ScriptSource, StaticScripts};
    pub use crate::storage::{DocumentStore, DurabilityMode, lock_for};
}

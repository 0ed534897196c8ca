use crate::core::{DbError, Result};
use crate::executor::{DEFAULT_SCRIPT_CACHE_CAPACITY, MutationPolicy, ScriptLoading};
use crate::storage::DurabilityMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SCHEMA_PATH: &str = "schema/heritage.schema";
pub const DEFAULT_DOCUMENT_PATH: &str = "data/catalog.json";
pub const DEFAULT_SCRIPTS_ROOT: &str = "scripts";
pub const DEFAULT_BOOTSTRAP_SCRIPT: &str = "common/initialize.ops";
pub const DEFAULT_BOOTSTRAP_OPERATION: &str = "initializeCatalog";

/// Operation run against a fresh document when the store is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapOperation {
    pub script: String,
    pub operation: String,
}

/// Engine configuration
///
/// `from_root` gives the conventional layout under one directory:
///
/// ```text
/// <root>/schema/heritage.schema
/// <root>/data/catalog.json
/// <root>/scripts/...
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema DSL file
    pub schema_path: PathBuf,

    /// Canonical document file; every save targets it
    pub document_path: PathBuf,

    /// Directory operation script ids are resolved against
    pub scripts_root: PathBuf,

    pub bootstrap: Option<BootstrapOperation>,

    /// Compiled scripts kept in the LRU cache
    pub script_cache_capacity: usize,

    pub script_loading: ScriptLoading,

    pub mutation_policy: MutationPolicy,

    pub durability: DurabilityMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            document_path: PathBuf::from(DEFAULT_DOCUMENT_PATH),
            scripts_root: PathBuf::from(DEFAULT_SCRIPTS_ROOT),
            bootstrap: Some(BootstrapOperation {
                script: DEFAULT_BOOTSTRAP_SCRIPT.to_string(),
                operation: DEFAULT_BOOTSTRAP_OPERATION.to_string(),
            }),
            script_cache_capacity: DEFAULT_SCRIPT_CACHE_CAPACITY,
            script_loading: ScriptLoading::default(),
            mutation_policy: MutationPolicy::default(),
            durability: DurabilityMode::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conventional layout below `root`.
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        Self::default().rebased(root.as_ref())
    }

    /// Reads a JSON config; relative paths are taken relative to the file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DbError::NotFound(format!("config file '{}'", path.display()))
            } else {
                DbError::Io(format!("Failed to read config '{}': {}", path.display(), e))
            }
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            DbError::Argument(format!("Invalid config '{}': {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.rebased(base))
    }

    fn rebased(mut self, base: &Path) -> Self {
        let rebase = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        self.schema_path = rebase(self.schema_path);
        self.document_path = rebase(self.document_path);
        self.scripts_root = rebase(self.scripts_root);
        self
    }

    pub fn schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = path.into();
        self
    }

    pub fn document_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.document_path = path.into();
        self
    }

    pub fn scripts_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.scripts_root = path.into();
        self
    }

    pub fn bootstrap(mut self, script: &str, operation: &str) -> Self {
        self.bootstrap = Some(BootstrapOperation {
            script: script.to_string(),
            operation: operation.to_string(),
        });
        self
    }

    /// Bootstrap leaves the document with only its root.
    pub fn without_bootstrap(mut self) -> Self {
        self.bootstrap = None;
        self
    }

    pub fn script_cache_capacity(mut self, capacity: usize) -> Self {
        self.script_cache_capacity = capacity;
        self
    }

    pub fn script_loading(mut self, loading: ScriptLoading) -> Self {
        self.script_loading = loading;
        self
    }

    pub fn mutation_policy(mut self, policy: MutationPolicy) -> Self {
        self.mutation_policy = policy;
        self
    }

    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_root_layout() {
        let config = EngineConfig::from_root("/srv/catalog");
        assert_eq!(
            config.schema_path,
            PathBuf::from("/srv/catalog/schema/heritage.schema")
        );
        assert_eq!(
            config.document_path,
            PathBuf::from("/srv/catalog/data/catalog.json")
        );
        assert_eq!(config.scripts_root, PathBuf::from("/srv/catalog/scripts"));
        assert_eq!(config.script_loading, ScriptLoading::Cached);
        assert_eq!(config.mutation_policy, MutationPolicy::Declared);
    }

    #[test]
    fn test_json_file_is_rebased_and_defaulted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{
                "document_path": "state/doc.json",
                "script_loading": "reparse",
                "mutation_policy": "name_prefix",
                "durability": "async",
                "bootstrap": null
            }"#,
        )
        .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.document_path, dir.path().join("state/doc.json"));
        assert_eq!(config.schema_path, dir.path().join(DEFAULT_SCHEMA_PATH));
        assert_eq!(config.script_loading, ScriptLoading::Reparse);
        assert_eq!(config.mutation_policy, MutationPolicy::NamePrefix);
        assert_eq!(config.durability, DurabilityMode::Async);
        assert!(config.bootstrap.is_none());
    }

    #[test]
    fn test_bad_json_is_argument_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(DbError::Argument(_))
        ));
    }
}

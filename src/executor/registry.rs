use crate::core::{DbError, Result, Value};
use crate::document::Document;
use crate::schema::Schema;
use crate::script::{CompiledOperation, OperationHandler, Script, ScriptSource};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{Level, event};

pub const DEFAULT_SCRIPT_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLoading {
    /// Compile once, keep the result in the LRU cache.
    #[default]
    Cached,
    /// Read and compile the script on every resolution.
    Reparse,
}

/// Maps script ids to compiled scripts.
///
/// Script text is read from a [`ScriptSource`] and compiled on first use.
/// Native operations registered with [`register_native`](Self::register_native)
/// are merged into the script of the same id, taking precedence over
/// scripted operations with the same name; a script id may consist of
/// native operations only.
pub struct OperationRegistry {
    source: Arc<dyn ScriptSource>,
    schema: Arc<Schema>,
    loading: ScriptLoading,
    cache: Mutex<LruCache<String, Arc<Script>>>,
    natives: RwLock<HashMap<String, Vec<CompiledOperation>>>,
    compilations: AtomicU64,
}

impl OperationRegistry {
    pub fn new(
        source: Arc<dyn ScriptSource>,
        schema: Arc<Schema>,
        capacity: usize,
        loading: ScriptLoading,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            schema,
            loading,
            cache: Mutex::new(LruCache::new(capacity)),
            natives: RwLock::new(HashMap::new()),
            compilations: AtomicU64::new(0),
        }
    }

    pub fn loading(&self) -> ScriptLoading {
        self.loading
    }

    /// Registers a Rust closure as operation `name` of `script_id`.
    pub fn register_native<F>(
        &self,
        script_id: &str,
        name: &str,
        arity: usize,
        mutates: bool,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&mut Document, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let handler: OperationHandler = Arc::new(handler);
        let operation = CompiledOperation {
            name: name.to_string(),
            params: (0..arity).map(|idx| format!("arg{}", idx)).collect(),
            mutates,
            handler,
        };

        {
            let mut natives = self.natives.write()?;
            let ops = natives.entry(script_id.to_string()).or_default();
            ops.retain(|op| op.name != name);
            ops.push(operation);
        }
        self.invalidate(script_id)?;
        event!(Level::DEBUG, script = script_id, operation = name, "native operation registered");
        Ok(())
    }

    /// Returns the compiled script for `script_id`.
    pub async fn resolve(&self, script_id: &str) -> Result<Arc<Script>> {
        if self.loading == ScriptLoading::Cached {
            let mut cache = self.cache.lock()?;
            if let Some(script) = cache.get(script_id) {
                return Ok(Arc::clone(script));
            }
        }

        let script = Arc::new(self.build(script_id).await?);

        if self.loading == ScriptLoading::Cached {
            self.cache
                .lock()?
                .put(script_id.to_string(), Arc::clone(&script));
        }
        Ok(script)
    }

    /// Drops a cached script so the next resolution recompiles it.
    pub fn invalidate(&self, script_id: &str) -> Result<bool> {
        Ok(self.cache.lock()?.pop(script_id).is_some())
    }

    pub fn cached_scripts(&self) -> Result<usize> {
        Ok(self.cache.lock()?.len())
    }

    /// Number of script compilations performed so far.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    async fn build(&self, script_id: &str) -> Result<Script> {
        let natives = self.natives.read()?.get(script_id).cloned();

        let mut script = match self.source.read(script_id).await {
            Ok(text) => {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                let script = Script::compile(script_id, &text, &self.schema)?;
                event!(
                    Level::DEBUG,
                    script = script_id,
                    operations = script.len(),
                    "script compiled"
                );
                script
            }
            Err(DbError::ScriptNotFound(_)) if natives.is_some() => Script::new(script_id),
            Err(err) => return Err(err),
        };

        for operation in natives.into_iter().flatten() {
            script.insert(operation);
        }
        Ok(script)
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("loading", &self.loading)
            .field("compilations", &self.compilations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::schema;
    use crate::script::StaticScripts;

    fn registry(loading: ScriptLoading) -> OperationRegistry {
        let scripts = StaticScripts::new()
            .with("caves.ops", "operation getAllCaves() {\n  return all Cave\n}\n")
            .with("broken.ops", "operation f( {\n}\n");
        OperationRegistry::new(Arc::new(scripts), schema(), 4, loading)
    }

    #[tokio::test]
    async fn test_cached_scripts_compile_once() {
        let registry = registry(ScriptLoading::Cached);
        let first = registry.resolve("caves.ops").await.unwrap();
        let second = registry.resolve("caves.ops").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.compilations(), 1);

        assert!(registry.invalidate("caves.ops").unwrap());
        registry.resolve("caves.ops").await.unwrap();
        assert_eq!(registry.compilations(), 2);
    }

    #[tokio::test]
    async fn test_reparse_compiles_every_time() {
        let registry = registry(ScriptLoading::Reparse);
        registry.resolve("caves.ops").await.unwrap();
        registry.resolve("caves.ops").await.unwrap();
        assert_eq!(registry.compilations(), 2);
        assert_eq!(registry.cached_scripts().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolution_errors() {
        let registry = registry(ScriptLoading::Cached);
        assert!(matches!(
            registry.resolve("nope.ops").await,
            Err(DbError::ScriptNotFound(_))
        ));
        assert!(matches!(
            registry.resolve("broken.ops").await,
            Err(DbError::ScriptParse { .. })
        ));
    }

    #[tokio::test]
    async fn test_native_operations_merge() {
        let registry = registry(ScriptLoading::Cached);
        registry
            .register_native(
                "caves.ops",
                "ping",
                0,
                false,
                |_, _| Ok(Value::from("pong")),
            )
            .unwrap();
        registry
            .register_native("native.ops", "one", 0, false, |_, _| Ok(Value::Integer(1)))
            .unwrap();

        let caves = registry.resolve("caves.ops").await.unwrap();
        assert!(caves.operation("getAllCaves").is_some());
        assert!(caves.operation("ping").is_some());

        let native = registry.resolve("native.ops").await.unwrap();
        assert_eq!(native.len(), 1);
    }
}

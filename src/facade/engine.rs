use super::config::EngineConfig;
use crate::core::{DbError, Result, Value};
use crate::document::Document;
use crate::executor::{Dispatcher, OperationRegistry};
use crate::mapper::{Record, to_record};
use crate::schema::Schema;
use crate::script::{DirectoryScripts, ScriptSource};
use crate::storage::{DocumentStore, LockStats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Level, event, instrument};

/// One `(operation, args)` entry of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCall {
    pub operation: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl OperationCall {
    pub fn new(operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            operation: operation.into(),
            args,
        }
    }
}

/// Engine counters
///
/// Every document handed to a call, loaded or bootstrapped, is disposed
/// exactly once, so `loads + bootstraps == disposals` once calls settle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub loads: u64,
    pub bootstraps: u64,
    pub saves: u64,
    pub executions: u64,
    pub batches: u64,
    pub disposals: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicU64,
    bootstraps: AtomicU64,
    saves: AtomicU64,
    executions: AtomicU64,
    batches: AtomicU64,
    disposals: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            loads: self.loads.load(Ordering::Relaxed),
            bootstraps: self.bootstraps.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            disposals: self.disposals.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// The in-memory document of one call. Dropping it disposes the document.
struct DocumentSession {
    document: Document,
    counters: Arc<Counters>,
}

impl DocumentSession {
    fn document(&self) -> &Document {
        &self.document
    }

    fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        Counters::bump(&self.counters.disposals);
        event!(Level::DEBUG, nodes = self.document.len(), "document disposed");
    }
}

// ============================================================================
// Catalog Engine
// ============================================================================

/// Runs named script operations against the canonical catalog document.
///
/// Every call is its own transaction: load, dispatch, save when the
/// operation mutates, dispose. Calls racing on the same file can lose
/// updates; use [`execute_batch`](Self::execute_batch) to apply dependent
/// operations atomically.
pub struct CatalogEngine {
    config: EngineConfig,
    schema: Arc<Schema>,
    store: DocumentStore,
    registry: OperationRegistry,
    dispatcher: Dispatcher,
    counters: Arc<Counters>,
}

impl CatalogEngine {
    /// Opens an engine reading scripts from `config.scripts_root`.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let source = Arc::new(DirectoryScripts::new(&config.scripts_root));
        Self::open_with_source(config, source).await
    }

    pub async fn open_with_source(
        config: EngineConfig,
        source: Arc<dyn ScriptSource>,
    ) -> Result<Self> {
        let text = tokio::fs::read_to_string(&config.schema_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DbError::NotFound(format!(
                        "Schema file {} does not exist",
                        config.schema_path.display()
                    ))
                } else {
                    DbError::Io(format!(
                        "Failed to read schema {}: {}",
                        config.schema_path.display(),
                        e
                    ))
                }
            })?;
        let schema = Arc::new(Schema::parse(&text)?);

        let store = DocumentStore::open(
            &config.document_path,
            Arc::clone(&schema),
            config.durability,
        )?;
        let registry = OperationRegistry::new(
            source,
            Arc::clone(&schema),
            config.script_cache_capacity,
            config.script_loading,
        );
        let dispatcher = Dispatcher::new(config.mutation_policy);

        event!(
            Level::INFO,
            schema = schema.namespace(),
            document = %config.document_path.display(),
            "catalog engine opened"
        );

        Ok(Self {
            config,
            schema,
            store,
            registry,
            dispatcher,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Registry for cache control and native operations.
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    pub fn lock_stats(&self) -> LockStats {
        self.store.lock_stats()
    }

    /// Runs one operation and returns its raw result.
    pub async fn execute(&self, script_id: &str, operation: &str, args: Vec<Value>) -> Result<Value> {
        self.execute_with(script_id, operation, args, |_, value| Ok(value))
            .await
    }

    /// Runs one operation and hands its result to `finish` while the
    /// document is still alive.
    #[instrument(level = "info", name = "execute", skip(self, args, finish))]
    pub async fn execute_with<T, F>(
        &self,
        script_id: &str,
        operation: &str,
        args: Vec<Value>,
        finish: F,
    ) -> Result<T>
    where
        F: FnOnce(&Document, Value) -> Result<T>,
    {
        Counters::bump(&self.counters.executions);
        let result = self.run_single(script_id, operation, args, finish).await;
        if let Err(err) = &result {
            Counters::bump(&self.counters.failures);
            event!(Level::ERROR, error = %err, "execution failed");
        }
        result
    }

    async fn run_single<T, F>(
        &self,
        script_id: &str,
        operation: &str,
        args: Vec<Value>,
        finish: F,
    ) -> Result<T>
    where
        F: FnOnce(&Document, Value) -> Result<T>,
    {
        let mut session = self.load_session().await?;
        let script = self.registry.resolve(script_id).await?;
        let dispatched =
            self.dispatcher
                .dispatch(&script, operation, args, session.document_mut())?;
        if dispatched.mutates {
            self.persist(session.document()).await?;
        }
        finish(session.document(), dispatched.value)
    }

    /// Runs `calls` in order on one document and persists once.
    ///
    /// The first failing call aborts the batch and nothing is written. An
    /// empty batch still loads and persists.
    #[instrument(level = "info", name = "batch", skip(self, calls), fields(calls = calls.len()))]
    pub async fn execute_batch(&self, script_id: &str, calls: Vec<OperationCall>) -> Result<Vec<Value>> {
        Counters::bump(&self.counters.batches);
        let result = self.run_batch(script_id, calls).await;
        if let Err(err) = &result {
            Counters::bump(&self.counters.failures);
            event!(Level::ERROR, error = %err, "batch aborted");
        }
        result
    }

    async fn run_batch(&self, script_id: &str, calls: Vec<OperationCall>) -> Result<Vec<Value>> {
        let mut session = self.load_session().await?;
        let script = self.registry.resolve(script_id).await?;

        let mut results = Vec::with_capacity(calls.len());
        for (idx, call) in calls.into_iter().enumerate() {
            let dispatched = self
                .dispatcher
                .dispatch(&script, &call.operation, call.args, session.document_mut())
                .inspect_err(|_| {
                    event!(Level::DEBUG, index = idx, operation = %call.operation, "batch call failed");
                })?;
            results.push(dispatched.value);
        }

        self.persist(session.document()).await?;
        Ok(results)
    }

    /// Runs a whole script through its `main` operation with `named`
    /// arguments bound to its parameters.
    ///
    /// Under [`MutationPolicy::NamePrefix`](crate::executor::MutationPolicy)
    /// the file is saved when the script path mentions `set`, `create`,
    /// `update` or `delete`; the declared policy also honours the entry's
    /// own flag.
    #[instrument(level = "info", name = "script", skip(self, named))]
    pub async fn execute_script(
        &self,
        script_id: &str,
        named: HashMap<String, Value>,
    ) -> Result<Value> {
        Counters::bump(&self.counters.executions);
        let result = self.run_script(script_id, named).await;
        if let Err(err) = &result {
            Counters::bump(&self.counters.failures);
            event!(Level::ERROR, error = %err, "script failed");
        }
        result
    }

    async fn run_script(&self, script_id: &str, named: HashMap<String, Value>) -> Result<Value> {
        let mut session = self.load_session().await?;
        let script = self.registry.resolve(script_id).await?;
        let dispatched = self
            .dispatcher
            .dispatch_entry(&script, named, session.document_mut())?;
        if dispatched.mutates {
            self.persist(session.document()).await?;
        }
        Ok(dispatched.value)
    }

    /// Seeds the canonical file when it is missing or empty.
    ///
    /// A fresh document runs the configured bootstrap operation and is then
    /// saved. A missing bootstrap script only logs a warning and the bare
    /// document is saved. The save re-checks emptiness under the store's
    /// exclusive section, so concurrent bootstraps write the file once.
    /// Returns `false` when the store already has content.
    #[instrument(level = "info", name = "bootstrap", skip(self))]
    pub async fn initialize_if_empty(&self) -> Result<bool> {
        if !self.store.is_empty().await? {
            return Ok(false);
        }

        Counters::bump(&self.counters.bootstraps);
        let mut session = DocumentSession {
            document: Document::new(Arc::clone(&self.schema)),
            counters: Arc::clone(&self.counters),
        };

        if let Some(bootstrap) = &self.config.bootstrap {
            match self.registry.resolve(&bootstrap.script).await {
                Ok(script) => {
                    self.dispatcher.dispatch(
                        &script,
                        &bootstrap.operation,
                        Vec::new(),
                        session.document_mut(),
                    )?;
                }
                Err(DbError::ScriptNotFound(script)) => {
                    event!(Level::WARN, script = %script, "bootstrap script not found, saving empty catalog");
                }
                Err(err) => return Err(err),
            }
        }

        if !self.store.save_if_empty(session.document()).await? {
            event!(Level::INFO, "catalog gained content, bootstrap discarded");
            return Ok(false);
        }
        Counters::bump(&self.counters.saves);
        event!(Level::INFO, nodes = session.document().len(), "catalog initialized");
        Ok(true)
    }

    /// Runs an operation returning one node and maps it into `R`.
    pub async fn fetch_record<R: Record>(
        &self,
        script_id: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Option<R>> {
        self.execute_with(script_id, operation, args, |document, value| match value {
            Value::Node(gid) => to_record::<R>(document.node(&gid)),
            Value::Null => Ok(None),
            other => Err(unexpected_result::<R>(&other)),
        })
        .await
    }

    /// Runs an operation returning a node collection and maps every node.
    pub async fn fetch_records<R: Record>(
        &self,
        script_id: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Vec<R>> {
        self.execute_with(script_id, operation, args, |document, value| {
            let gids = value
                .node_refs()
                .ok_or_else(|| unexpected_result::<R>(&value))?;
            let mut records = Vec::with_capacity(gids.len());
            for gid in gids {
                if let Some(record) = to_record::<R>(document.node(&gid))? {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
    }

    async fn load_session(&self) -> Result<DocumentSession> {
        let document = self.store.load().await?;
        Counters::bump(&self.counters.loads);
        Ok(DocumentSession {
            document,
            counters: Arc::clone(&self.counters),
        })
    }

    async fn persist(&self, document: &Document) -> Result<()> {
        self.store.save(document).await?;
        Counters::bump(&self.counters.saves);
        Ok(())
    }
}

fn unexpected_result<R: Record>(value: &Value) -> DbError {
    DbError::conversion(
        R::RECORD_NAME,
        DbError::TypeMismatch(format!(
            "operation returned {}, expected {} node(s)",
            value.type_name(),
            R::TYPE_NAME
        )),
    )
}

impl std::fmt::Debug for CatalogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEngine")
            .field("schema", &self.schema.namespace())
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("policy", &self.dispatcher.policy())
            .finish()
    }
}

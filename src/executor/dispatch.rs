use crate::core::{DbError, Result, Value};
use crate::document::Document;
use crate::script::{CompiledOperation, ENTRY_OPERATION, Script, infer_mutates, infer_script_mutates};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// How a call is classified as mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPolicy {
    /// The operation's own flag; scripts that declare nothing fall back to
    /// the name prefix rule.
    #[default]
    Declared,
    /// Only the name prefix rule (`set`, `create`, `update`, `delete`).
    NamePrefix,
}

impl MutationPolicy {
    pub fn classify(&self, operation: &CompiledOperation) -> bool {
        match self {
            MutationPolicy::Declared => operation.mutates,
            MutationPolicy::NamePrefix => infer_mutates(&operation.name),
        }
    }

    /// Classifies a whole-script run through its entry operation.
    pub fn classify_entry(&self, script_id: &str, entry: &CompiledOperation) -> bool {
        match self {
            MutationPolicy::Declared => entry.mutates || infer_script_mutates(script_id),
            MutationPolicy::NamePrefix => infer_script_mutates(script_id),
        }
    }
}

/// Result of one dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub value: Value,
    pub mutates: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    policy: MutationPolicy,
}

impl Dispatcher {
    pub fn new(policy: MutationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MutationPolicy {
        self.policy
    }

    /// Exact, case-sensitive lookup of `name` in `script`.
    pub fn lookup(&self, script: &Script, name: &str) -> Result<Arc<CompiledOperation>> {
        script
            .operation(name)
            .cloned()
            .ok_or_else(|| DbError::OperationNotFound {
                script: script.id().to_string(),
                operation: name.to_string(),
            })
    }

    /// Runs operation `name` with positional `args` against `document`.
    pub fn dispatch(
        &self,
        script: &Script,
        name: &str,
        args: Vec<Value>,
        document: &mut Document,
    ) -> Result<Dispatched> {
        let span = info_span!("dispatch", script = script.id(), operation = name);
        let _enter = span.enter();

        let operation = self.lookup(script, name)?;
        if args.len() != operation.arity() {
            return Err(DbError::Argument(format!(
                "{}::{} expects {} argument(s), got {}",
                script.id(),
                name,
                operation.arity(),
                args.len()
            )));
        }

        let mutates = self.policy.classify(&operation);
        invoke(&operation, args, mutates, document)
    }

    /// Runs the script's entry operation, binding `named` arguments to its
    /// parameters by name.
    pub fn dispatch_entry(
        &self,
        script: &Script,
        mut named: HashMap<String, Value>,
        document: &mut Document,
    ) -> Result<Dispatched> {
        let span = info_span!("dispatch", script = script.id(), operation = ENTRY_OPERATION);
        let _enter = span.enter();

        let operation = self.lookup(script, ENTRY_OPERATION)?;
        let mut args = Vec::with_capacity(operation.arity());
        for param in &operation.params {
            let value = named.remove(param).ok_or_else(|| {
                DbError::Argument(format!("{}: missing parameter '{}'", script.id(), param))
            })?;
            args.push(value);
        }
        if let Some(extra) = named.keys().min() {
            return Err(DbError::Argument(format!(
                "{}: unknown parameter '{}'",
                script.id(),
                extra
            )));
        }

        let mutates = self.policy.classify_entry(script.id(), &operation);
        invoke(&operation, args, mutates, document)
    }
}

fn invoke(
    operation: &CompiledOperation,
    args: Vec<Value>,
    mutates: bool,
    document: &mut Document,
) -> Result<Dispatched> {
    match (operation.handler)(document, args) {
        Ok(value) => {
            event!(Level::DEBUG, mutates, "operation completed");
            Ok(Dispatched { value, mutates })
        }
        Err(err) => {
            event!(Level::ERROR, error = %err, "operation failed");
            Err(err)
        }
    }
}

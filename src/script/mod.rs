//! Operation scripts: a small line-based language whose operations compile
//! to [`OperationHandler`] closures over a [`Document`](crate::document::Document).

pub mod ast;
mod compile;
mod parser;
mod source;

pub use compile::{
    CompiledOperation, ENTRY_OPERATION, OperationHandler, Script, infer_mutates,
    infer_script_mutates,
};
pub use parser::parse_script;
pub use source::{DirectoryScripts, ScriptSource, StaticScripts};

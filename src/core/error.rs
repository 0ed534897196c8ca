use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("Persist error: {0}")]
    Persist(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Script '{0}' not found")]
    ScriptNotFound(String),

    #[error("Script parse error in '{script}': {message}")]
    ScriptParse { script: String, message: String },

    #[error("Operation '{operation}' not found in script '{script}'")]
    OperationNotFound { script: String, operation: String },

    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Type '{type_name}' has no attribute '{attribute}'")]
    UnknownAttribute { type_name: String, attribute: String },

    #[error("Type '{type_name}' has no relationship '{relationship}'")]
    UnknownRelationship {
        type_name: String,
        relationship: String,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Cannot convert node to {record}: {source}")]
    Conversion {
        record: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    pub fn script_parse(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScriptParse {
            script: script.into(),
            message: message.into(),
        }
    }

    pub fn conversion(record: impl Into<String>, source: DbError) -> Self {
        Self::Conversion {
            record: record.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

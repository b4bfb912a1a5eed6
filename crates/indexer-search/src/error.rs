//! Search storage error types.

use thiserror::Error;

/// Errors that can occur reading or writing the search index.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Index settings out of range
    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),

    /// Index writer is poisoned or held elsewhere
    #[error("Index is locked: {0}")]
    IndexLocked(String),
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

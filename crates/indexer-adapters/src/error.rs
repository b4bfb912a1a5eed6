//! Error types for source data handlers.

use std::path::PathBuf;

use indexer_pipeline::{IndexingError, UnprocessableReason};
use thiserror::Error;

/// Errors raised while reading a local object tree.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error at {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<AdapterError> for IndexingError {
    fn from(err: AdapterError) -> Self {
        match &err {
            AdapterError::Io { .. } => IndexingError::Retriable(err.to_string()),
            AdapterError::Parse { .. } => {
                IndexingError::unprocessable(UnprocessableReason::Parse, err.to_string())
            }
            AdapterError::InvalidReference(_) | AdapterError::NotFound(_) => {
                IndexingError::unprocessable(UnprocessableReason::Other, err.to_string())
            }
        }
    }
}

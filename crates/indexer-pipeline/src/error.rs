//! Failure taxonomy for the indexing pipeline.
//!
//! Every failure carries an [`ErrorKind`] that decides what happens next:
//! retry, fail the event, or stop the loop.

use std::fmt;

use indexer_rules::RulesError;
use indexer_search::SearchError;
use indexer_storage::StorageError;
use indexer_types::TypesError;
use thiserror::Error;

/// How a failure is handled by the retrier and the loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structurally invalid or unsupported; the event fails, no retry
    Unprocessable,
    /// Transient; retried with a fixed delay, then the event fails
    Retriable,
    /// Retried with backoff; exhaustion stops the loop
    FatalRetriable,
    /// Control state may be corrupt; stops the loop immediately
    Fatal,
    /// Cooperative cancellation
    Interrupted,
}

impl ErrorKind {
    /// Whether the owning loop must stop rather than fail one event.
    pub fn stops_loop(&self) -> bool {
        matches!(
            self,
            ErrorKind::FatalRetriable | ErrorKind::Fatal | ErrorKind::Interrupted
        )
    }
}

/// Why an event or object could not be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnprocessableReason {
    UnsupportedEvent,
    NoHandler,
    SubobjectCount,
    SubobjectPrimaryKey,
    Location,
    Parse,
    TypeRules,
    Other,
}

impl UnprocessableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnprocessableReason::UnsupportedEvent => "unsupported event",
            UnprocessableReason::NoHandler => "no handler",
            UnprocessableReason::SubobjectCount => "subobject count",
            UnprocessableReason::SubobjectPrimaryKey => "subobject primary key",
            UnprocessableReason::Location => "location",
            UnprocessableReason::Parse => "parse",
            UnprocessableReason::TypeRules => "type rules",
            UnprocessableReason::Other => "other",
        }
    }
}

impl fmt::Display for UnprocessableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while moving events through the pipeline.
#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("Unprocessable ({reason}): {message}")]
    Unprocessable {
        reason: UnprocessableReason,
        message: String,
    },

    #[error("Retriable error: {0}")]
    Retriable(String),

    #[error("Fatal retriable error: {0}")]
    FatalRetriable(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Interrupted")]
    Interrupted,
}

impl IndexingError {
    pub fn unprocessable(reason: UnprocessableReason, message: impl Into<String>) -> Self {
        IndexingError::Unprocessable {
            reason,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexingError::Unprocessable { .. } => ErrorKind::Unprocessable,
            IndexingError::Retriable(_) => ErrorKind::Retriable,
            IndexingError::FatalRetriable(_) => ErrorKind::FatalRetriable,
            IndexingError::Fatal(_) => ErrorKind::Fatal,
            IndexingError::Interrupted => ErrorKind::Interrupted,
        }
    }

    /// The unprocessable reason, if this is an unprocessable failure.
    pub fn reason(&self) -> Option<UnprocessableReason> {
        match self {
            IndexingError::Unprocessable { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Undecodable records or a missing column family mean the store itself is
/// broken; everything else may clear up on retry.
impl From<StorageError> for IndexingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ColumnFamilyNotFound(_)
            | StorageError::Key(_)
            | StorageError::Serialization(_) => {
                IndexingError::Fatal(format!("event storage: {}", err))
            }
            _ => IndexingError::Retriable(format!("event storage: {}", err)),
        }
    }
}

impl From<SearchError> for IndexingError {
    fn from(err: SearchError) -> Self {
        IndexingError::Retriable(format!("search storage: {}", err))
    }
}

impl From<RulesError> for IndexingError {
    fn from(err: RulesError) -> Self {
        let reason = match &err {
            RulesError::Location(_) => UnprocessableReason::Location,
            RulesError::Conversion(_) => UnprocessableReason::Parse,
            RulesError::NotFound(_)
            | RulesError::InvalidRule(_)
            | RulesError::UnknownTransform(_)
            | RulesError::Load(_) => UnprocessableReason::TypeRules,
            RulesError::Types(_) => UnprocessableReason::Other,
        };
        IndexingError::unprocessable(reason, err.to_string())
    }
}

impl From<TypesError> for IndexingError {
    fn from(err: TypesError) -> Self {
        IndexingError::unprocessable(UnprocessableReason::Other, err.to_string())
    }
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::unprocessable(UnprocessableReason::Parse, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexingError::unprocessable(UnprocessableReason::SubobjectCount, "too many");
        assert_eq!(err.to_string(), "Unprocessable (subobject count): too many");
        assert_eq!(err.reason(), Some(UnprocessableReason::SubobjectCount));

        let err = IndexingError::Retriable("timeout".to_string());
        assert_eq!(err.to_string(), "Retriable error: timeout");
        assert_eq!(err.reason(), None);
    }

    #[test]
    fn test_kinds_that_stop_the_loop() {
        assert!(!ErrorKind::Unprocessable.stops_loop());
        assert!(!ErrorKind::Retriable.stops_loop());
        assert!(ErrorKind::FatalRetriable.stops_loop());
        assert!(ErrorKind::Fatal.stops_loop());
        assert!(ErrorKind::Interrupted.stops_loop());
    }

    #[test]
    fn test_crate_errors_map_into_taxonomy() {
        let err: IndexingError = StorageError::Internal("disk".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Retriable);

        let err: IndexingError = StorageError::Serialization("truncated".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.kind().stops_loop());

        let err: IndexingError = RulesError::NotFound("Genome_3".to_string()).into();
        assert_eq!(err.reason(), Some(UnprocessableReason::TypeRules));

        let err: IndexingError = RulesError::Location("bad".to_string()).into();
        assert_eq!(err.reason(), Some(UnprocessableReason::Location));

        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: IndexingError = json_err.into();
        assert_eq!(err.reason(), Some(UnprocessableReason::Parse));
    }
}

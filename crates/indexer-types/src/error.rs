//! Error types for the shared domain types.

use thiserror::Error;

/// Errors raised while building or parsing domain types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A GUID or reference path string could not be parsed
    #[error("Invalid GUID: {0}")]
    InvalidGuid(String),

    /// A search or storage type name is illegal
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// Unknown event type or processing state code
    #[error("Unknown code: {0}")]
    UnknownCode(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TypesError::InvalidGuid("WS:x".to_string());
        assert_eq!(err.to_string(), "Invalid GUID: WS:x");

        let err = TypesError::UnknownCode("BOGUS".to_string());
        assert_eq!(err.to_string(), "Unknown code: BOGUS");
    }
}

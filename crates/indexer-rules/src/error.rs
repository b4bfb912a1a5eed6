//! Error types for the type rule engine.

use thiserror::Error;

/// Errors from building, loading, or applying type rules.
#[derive(Debug, Error)]
pub enum RulesError {
    /// An indexing rule or rule set failed validation
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// A transform spec named an unknown transform
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    /// No rules exist for the requested search type or version
    #[error("Type not found: {0}")]
    NotFound(String),

    /// A value could not be converted to the rule's keyword type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A location value was malformed
    #[error("Location error: {0}")]
    Location(String),

    /// A rule file could not be read or parsed
    #[error("Load error: {0}")]
    Load(String),

    /// Domain type error
    #[error(transparent)]
    Types(#[from] indexer_types::TypesError),
}

impl From<serde_yaml::Error> for RulesError {
    fn from(err: serde_yaml::Error) -> Self {
        RulesError::Load(err.to_string())
    }
}

impl From<std::io::Error> for RulesError {
    fn from(err: std::io::Error) -> Self {
        RulesError::Load(err.to_string())
    }
}

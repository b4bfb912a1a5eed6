//! Object type names on both sides of the pipeline.
//!
//! A [`StorageObjectType`] is the type as the data source knows it; a
//! [`SearchObjectType`] is the type as the search storage knows it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TypesError;

/// Maximum length of a search type name in UTF-8 bytes.
pub const MAX_SEARCH_TYPE_NAME_BYTES: usize = 50;

/// A type as known to the storage backend, optionally versioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageObjectType {
    /// Storage code of the backend (e.g. "WS")
    pub storage_code: String,
    /// Type name in the backend's own terms
    pub type_name: String,
    /// Backend type version, if the backend versions its types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl StorageObjectType {
    /// Create an unversioned storage type.
    pub fn new(storage_code: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            storage_code: storage_code.into(),
            type_name: type_name.into(),
            version: None,
        }
    }

    /// Create a versioned storage type.
    pub fn versioned(
        storage_code: impl Into<String>,
        type_name: impl Into<String>,
        version: u32,
    ) -> Self {
        Self {
            version: Some(version),
            ..Self::new(storage_code, type_name)
        }
    }

    /// The same storage type with the version dropped.
    pub fn unversioned(&self) -> Self {
        Self::new(self.storage_code.clone(), self.type_name.clone())
    }
}

impl fmt::Display for StorageObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}:{}-{}", self.storage_code, self.type_name, v),
            None => write!(f, "{}:{}", self.storage_code, self.type_name),
        }
    }
}

/// A type as known to the search storage.
///
/// Names are ASCII letter-led, alphanumeric, and at most
/// [`MAX_SEARCH_TYPE_NAME_BYTES`] long. Versions start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchObjectType {
    type_name: String,
    version: u32,
}

impl SearchObjectType {
    /// Create a search type, validating the name and version.
    pub fn new(type_name: impl Into<String>, version: u32) -> Result<Self, TypesError> {
        let type_name = type_name.into();
        validate_search_type_name(&type_name)?;
        if version < 1 {
            return Err(TypesError::InvalidType(format!(
                "search type {} version must be at least 1",
                type_name
            )));
        }
        Ok(Self { type_name, version })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for SearchObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.type_name, self.version)
    }
}

/// Check a search type name: letter-led, ASCII alphanumeric, bounded length.
pub fn validate_search_type_name(name: &str) -> Result<(), TypesError> {
    let mut chars = name.chars();
    match chars.next() {
        None => {
            return Err(TypesError::InvalidType(
                "search type name cannot be empty".to_string(),
            ))
        }
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err(TypesError::InvalidType(format!(
                "search type name {} must start with a letter",
                name
            )))
        }
        Some(_) => {}
    }
    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric()) {
        return Err(TypesError::InvalidType(format!(
            "illegal character '{}' in search type name {}",
            c, name
        )));
    }
    if name.len() > MAX_SEARCH_TYPE_NAME_BYTES {
        return Err(TypesError::InvalidType(format!(
            "search type name {} exceeds {} bytes",
            name, MAX_SEARCH_TYPE_NAME_BYTES
        )));
    }
    Ok(())
}

//! Mappings from storage types to the search types that index them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use indexer_types::object_type::validate_search_type_name;

use crate::error::RulesError;

/// A search type named by a mapping, optionally pinned to a version.
///
/// Written as `Name` (newest version) or `Name_3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchTypeRef {
    pub type_name: String,
    pub version: Option<u32>,
}

impl SearchTypeRef {
    pub fn latest(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            version: None,
        }
    }

    pub fn versioned(type_name: impl Into<String>, version: u32) -> Self {
        Self {
            type_name: type_name.into(),
            version: Some(version),
        }
    }
}

impl fmt::Display for SearchTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}_{}", self.type_name, v),
            None => f.write_str(&self.type_name),
        }
    }
}

impl FromStr for SearchTypeRef {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, version) = match s.split_once('_') {
            Some((name, v)) => {
                let v: u32 = v.parse().map_err(|_| {
                    RulesError::InvalidRule(format!("bad version in search type {}", s))
                })?;
                (name, Some(v))
            }
            None => (s, None),
        };
        validate_search_type_name(name)?;
        if version == Some(0) {
            return Err(RulesError::InvalidRule(format!(
                "search type versions start at 1: {}",
                s
            )));
        }
        Ok(Self {
            type_name: name.to_string(),
            version,
        })
    }
}

/// Search types applicable to one storage type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    storage_code: String,
    storage_type: String,
    default_search_types: Vec<SearchTypeRef>,
    version_overrides: BTreeMap<u32, Vec<SearchTypeRef>>,
}

impl TypeMapping {
    pub fn new(
        storage_code: impl Into<String>,
        storage_type: impl Into<String>,
        default_search_types: Vec<SearchTypeRef>,
    ) -> Self {
        Self {
            storage_code: storage_code.into(),
            storage_type: storage_type.into(),
            default_search_types,
            version_overrides: BTreeMap::new(),
        }
    }

    /// Use `search_types` for storage type version `version` instead of the default set.
    pub fn with_version_override(mut self, version: u32, search_types: Vec<SearchTypeRef>) -> Self {
        self.version_overrides.insert(version, search_types);
        self
    }

    pub fn storage_code(&self) -> &str {
        &self.storage_code
    }

    pub fn storage_type(&self) -> &str {
        &self.storage_type
    }

    /// Search types for a storage type version. Versions without an
    /// override, and unversioned lookups, get the default set.
    pub fn search_types(&self, version: Option<u32>) -> &[SearchTypeRef] {
        version
            .and_then(|v| self.version_overrides.get(&v))
            .unwrap_or(&self.default_search_types)
    }

    /// Every search type the mapping names, defaults first.
    pub fn all_search_types(&self) -> impl Iterator<Item = &SearchTypeRef> {
        self.default_search_types
            .iter()
            .chain(self.version_overrides.values().flatten())
    }
}

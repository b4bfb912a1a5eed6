//! # indexer-rules
//!
//! The type rule engine: what to extract from a source object and how to
//! shape it before it reaches the search storage.
//!
//! - [`IndexingRules`]: one keyword extraction rule
//! - [`ObjectTypeParsingRules`]: the rule set for one search type version
//! - [`TypeMapping`]: which search types apply to a storage type
//! - [`TypeStorage`]: lookup over loaded rules, with version dispatch
//! - [`loader`]: YAML documents to a [`MemoryTypeStorage`]

pub mod error;
pub mod indexing_rules;
pub mod keyword_type;
pub mod loader;
pub mod mapping;
pub mod parsing_rules;
pub mod path;
pub mod storage;
pub mod transform;

pub use error::RulesError;
pub use indexing_rules::{IndexingRules, IndexingRulesBuilder, RuleSource};
pub use keyword_type::KeywordType;
pub use loader::{load_type_rules_dir, parse_mapping_document, parse_type_document};
pub use mapping::{SearchTypeRef, TypeMapping};
pub use parsing_rules::{ObjectTypeParsingRules, ObjectTypeParsingRulesBuilder, SubObjectSpec};
pub use path::ObjectJsonPath;
pub use storage::{MemoryTypeStorage, TypeStorage};
pub use transform::{LocationTransformType, Transform};

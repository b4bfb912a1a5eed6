//! What a source data handler loads and what the rule engine extracts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provenance of an object version, returned alongside its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceData {
    /// Object name at the source
    pub name: String,
    /// User who created this version
    pub creator: String,
    /// User who copied the object here, if it was copied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Free-form tags the source attaches to the container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_tags: Vec<String>,
}

impl SourceData {
    pub fn new(name: impl Into<String>, creator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            creator: creator.into(),
            ..Default::default()
        }
    }

    pub fn with_copier(mut self, copier: impl Into<String>) -> Self {
        self.copier = Some(copier.into());
        self
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    pub fn with_source_tags(mut self, tags: Vec<String>) -> Self {
        self.source_tags = tags;
        self
    }
}

/// Result of applying one rule set to one (sub)object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedObject {
    /// The JSON fragment the rules were applied to
    pub json: String,
    /// Extracted key name to one or many values
    pub keywords: BTreeMap<String, Vec<serde_json::Value>>,
}

impl ParsedObject {
    pub fn new(json: impl Into<String>) -> Self {
        Self {
            json: json.into(),
            keywords: BTreeMap::new(),
        }
    }

    /// Append values under a key, creating the key if needed.
    pub fn add_values(&mut self, key: &str, values: impl IntoIterator<Item = serde_json::Value>) {
        self.keywords
            .entry(key.to_string())
            .or_default()
            .extend(values);
    }

    pub fn values(&self, key: &str) -> Option<&[serde_json::Value]> {
        self.keywords.get(key).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parsed_object_accumulates_values() {
        let mut parsed = ParsedObject::new("{}");
        parsed.add_values("gene", vec![json!("a")]);
        parsed.add_values("gene", vec![json!("b")]);
        assert_eq!(parsed.values("gene").unwrap(), &[json!("a"), json!("b")]);
        assert!(parsed.values("missing").is_none());
    }

    #[test]
    fn test_source_data_builder() {
        let data = SourceData::new("genome1", "alice").with_md5("abc");
        assert_eq!(data.md5.as_deref(), Some("abc"));
        assert!(data.copier.is_none());
    }
}

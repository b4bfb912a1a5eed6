//! Stored records and their mapping to Tantivy documents.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tantivy::TantivyDocument;

use indexer_types::{Guid, SearchObjectType};

use crate::error::SearchError;
use crate::schema::SearchSchema;

/// Everything stored for one indexed (sub)object under one search type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub guid: Guid,
    pub search_type: SearchObjectType,
    pub ui_type_name: String,
    pub object_name: String,
    pub creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copier: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_public: bool,
    #[serde(default)]
    pub is_deleted: bool,
    /// JSON fragment the keywords were extracted from
    pub data: String,
    /// Pruned parent fragment, for subobjects only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_data: Option<String>,
    pub keywords: BTreeMap<String, Vec<Value>>,
    /// Keys excluded from the `keyword` terms
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub not_indexed: HashSet<String>,
    /// Keys whose values also go to the full-text field
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub full_text: HashSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_tags: Vec<String>,
}

impl IndexedRecord {
    /// Unique document key per search type and GUID.
    pub fn doc_id(&self) -> String {
        doc_id(self.search_type.type_name(), &self.guid)
    }

    /// Build the Tantivy document, re-deriving every indexed term from the record.
    pub fn to_document(&self, schema: &SearchSchema) -> Result<TantivyDocument, SearchError> {
        let mut doc = TantivyDocument::default();
        doc.add_text(schema.doc_id, self.doc_id());
        doc.add_text(schema.guid, self.guid.to_string());
        doc.add_text(schema.parent_guid, self.guid.parent().to_string());
        doc.add_text(schema.object_key, self.guid.object_key());
        doc.add_text(schema.search_type, self.search_type.type_name());

        for (key, values) in &self.keywords {
            let indexed = !self.not_indexed.contains(key);
            let full_text = self.full_text.contains(key);
            for value in values {
                let text = value_text(value);
                if indexed {
                    doc.add_text(schema.keyword, format!("{}={}", key, text));
                }
                if full_text {
                    doc.add_text(schema.text, text);
                }
            }
        }

        doc.add_text(schema.record, serde_json::to_string(self)?);
        Ok(doc)
    }

    /// Project the record into the shape requested by `post`.
    pub fn to_object_data(&self, post: &PostProcessing) -> Result<ObjectData, SearchError> {
        let data = if post.include_data {
            Some(serde_json::from_str(&self.data)?)
        } else {
            None
        };
        let parent_data = match (&self.parent_data, post.include_parent_data) {
            (Some(parent), true) => Some(serde_json::from_str(parent)?),
            _ => None,
        };
        let keywords = if post.include_keywords {
            self.keywords.clone()
        } else {
            BTreeMap::new()
        };

        Ok(ObjectData {
            guid: self.guid.clone(),
            parent_guid: self.guid.is_sub_object().then(|| self.guid.parent()),
            search_type: self.search_type.clone(),
            ui_type_name: self.ui_type_name.clone(),
            object_name: self.object_name.clone(),
            creator: self.creator.clone(),
            copier: self.copier.clone(),
            timestamp: self.timestamp,
            is_public: self.is_public,
            data,
            parent_data,
            keywords,
            source_tags: self.source_tags.clone(),
        })
    }
}

pub(crate) fn doc_id(type_name: &str, guid: &Guid) -> String {
    format!("{}|{}", type_name, guid)
}

/// Keyword values are indexed by their plain string form.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Which optional parts of a record [`get_objects_by_ids`] returns.
///
/// [`get_objects_by_ids`]: crate::SearchStorage::get_objects_by_ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostProcessing {
    pub include_data: bool,
    pub include_parent_data: bool,
    pub include_keywords: bool,
}

impl PostProcessing {
    /// Identity and metadata only.
    pub fn ids_only() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            include_data: true,
            include_parent_data: true,
            include_keywords: true,
        }
    }

    pub fn with_keywords(mut self, include: bool) -> Self {
        self.include_keywords = include;
        self
    }
}

/// An indexed object as returned by the search storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub guid: Guid,
    pub parent_guid: Option<Guid>,
    pub search_type: SearchObjectType,
    pub ui_type_name: String,
    pub object_name: String,
    pub creator: String,
    pub copier: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_public: bool,
    pub data: Option<Value>,
    pub parent_data: Option<Value>,
    pub keywords: BTreeMap<String, Vec<Value>>,
    pub source_tags: Vec<String>,
}

impl ObjectData {
    pub fn keyword(&self, key: &str) -> Option<&[Value]> {
        self.keywords.get(key).map(Vec::as_slice)
    }
}

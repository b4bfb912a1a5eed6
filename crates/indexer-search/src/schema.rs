//! Tantivy schema definition for indexed objects.

use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct SearchSchema {
    schema: Schema,
    /// Primary key: `{search type}|{guid}` (STRING | STORED)
    pub doc_id: Field,
    /// Full GUID including any subobject part (STRING)
    pub guid: Field,
    /// GUID with the subobject part dropped (STRING)
    pub parent_guid: Field,
    /// Version-less object key, shared by every version (STRING)
    pub object_key: Field,
    /// Search type name without version (STRING)
    pub search_type: Field,
    /// `key=value` terms for indexed keywords (STRING, multi-valued)
    pub keyword: Field,
    /// Full-text keyword values (TEXT)
    pub text: Field,
    /// JSON-encoded [`IndexedRecord`](crate::IndexedRecord) (STORED)
    pub record: Field,
}

impl SearchSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a SearchSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
        };

        Ok(Self {
            doc_id: field("doc_id")?,
            guid: field("guid")?,
            parent_guid: field("parent_guid")?,
            object_key: field("object_key")?,
            search_type: field("search_type")?,
            keyword: field("keyword")?,
            text: field("text")?,
            record: field("record")?,
            schema,
        })
    }
}

/// Build the object index schema.
pub fn build_object_schema() -> SearchSchema {
    let mut schema_builder = Schema::builder();

    let doc_id = schema_builder.add_text_field("doc_id", STRING | STORED);
    let guid = schema_builder.add_text_field("guid", STRING);
    let parent_guid = schema_builder.add_text_field("parent_guid", STRING);
    let object_key = schema_builder.add_text_field("object_key", STRING);
    let search_type = schema_builder.add_text_field("search_type", STRING);
    let keyword = schema_builder.add_text_field("keyword", STRING);
    let text = schema_builder.add_text_field("text", TEXT);
    // Not indexed; read back on every mutation
    let record = schema_builder.add_text_field("record", STORED);

    let schema = schema_builder.build();

    SearchSchema {
        schema,
        doc_id,
        guid,
        parent_guid,
        object_key,
        search_type,
        keyword,
        text,
        record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schema() {
        let schema = build_object_schema();
        assert!(schema.schema.get_field("doc_id").is_ok());
        assert!(schema.schema.get_field("object_key").is_ok());
        assert!(schema.schema.get_field("record").is_ok());
    }

    #[test]
    fn test_from_schema() {
        let original = build_object_schema();
        let rebuilt = SearchSchema::from_schema(original.schema().clone()).unwrap();
        assert_eq!(rebuilt.doc_id, original.doc_id);
        assert_eq!(rebuilt.guid, original.guid);
        assert_eq!(rebuilt.record, original.record);
    }

    #[test]
    fn test_from_schema_rejects_foreign_schema() {
        let mut builder = Schema::builder();
        builder.add_text_field("doc_id", STRING | STORED);
        let result = SearchSchema::from_schema(builder.build());
        assert!(matches!(result, Err(SearchError::SchemaMismatch(_))));
    }
}

//! The search storage contract and its Tantivy implementation.
//!
//! Every mutation is a read-modify-write of stored records under the writer
//! lock, followed by a commit and an explicit reader reload. A write is
//! therefore visible to the very next presence check.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tantivy::collector::{Count, DocSetCollector};
use tantivy::query::TermQuery;
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{IndexReader, IndexWriter, TantivyDocument, Term};
use tracing::{debug, info};

use indexer_rules::ObjectTypeParsingRules;
use indexer_types::{Guid, ParsedObject, SourceData};

use crate::document::{IndexedRecord, ObjectData, PostProcessing};
use crate::error::SearchError;
use crate::index::{ObjectIndex, SearchIndexConfig};
use crate::schema::SearchSchema;

/// The output of one rule set applied to one object, ready to be written.
#[derive(Debug, Clone, Copy)]
pub struct ObjectIndexingRequest<'a> {
    pub rules: &'a ObjectTypeParsingRules,
    pub source: &'a SourceData,
    pub timestamp: DateTime<Utc>,
    /// Parent-level fragment; stored on subobject records
    pub parent_json: Option<&'a str>,
    /// The object being indexed
    pub guid: &'a Guid,
    /// Parsed objects keyed by GUID: the object itself, or its subobjects
    pub objects: &'a BTreeMap<Guid, ParsedObject>,
    pub is_public: bool,
}

/// Operations the indexing pipeline needs from a search storage.
///
/// Counts returned by mutations are numbers of documents touched.
#[async_trait]
pub trait SearchStorage: Send + Sync {
    /// Whether each object GUID has been written as a (non-subobject) document.
    async fn check_parent_guids_exist(
        &self,
        guids: &[Guid],
    ) -> Result<HashMap<Guid, bool>, SearchError>;

    async fn index_objects(&self, request: ObjectIndexingRequest<'_>)
        -> Result<usize, SearchError>;

    async fn delete_all_versions(&self, guid: &Guid) -> Result<usize, SearchError>;

    async fn undelete_all_versions(&self, guid: &Guid) -> Result<usize, SearchError>;

    /// Publish specific object versions and their subobjects.
    async fn publish_objects(&self, guids: &[Guid]) -> Result<usize, SearchError>;

    async fn unpublish_objects(&self, guids: &[Guid]) -> Result<usize, SearchError>;

    async fn publish_all_versions(&self, guid: &Guid) -> Result<usize, SearchError>;

    async fn unpublish_all_versions(&self, guid: &Guid) -> Result<usize, SearchError>;

    async fn set_name_on_all_object_versions(
        &self,
        guid: &Guid,
        name: &str,
    ) -> Result<usize, SearchError>;

    /// Non-deleted documents for the given GUIDs, in request order.
    async fn get_objects_by_ids(
        &self,
        guids: &[Guid],
        post: PostProcessing,
    ) -> Result<Vec<ObjectData>, SearchError>;
}

/// [`SearchStorage`] over an embedded Tantivy index.
pub struct TantivySearchStorage {
    schema: SearchSchema,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl TantivySearchStorage {
    pub fn open(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = ObjectIndex::open(config)?;
        let writer = index.writer()?;
        let reader = index.reader()?;
        Ok(Self {
            schema: index.schema().clone(),
            writer: Mutex::new(writer),
            reader,
        })
    }

    /// Number of documents, including deleted ones.
    pub fn document_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Number of documents carrying the keyword term `key=value`.
    pub fn count_keyword(&self, key: &str, value: &str) -> Result<usize, SearchError> {
        self.count(Term::from_field_text(
            self.schema.keyword,
            &format!("{}={}", key, value),
        ))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, IndexWriter>, SearchError> {
        self.writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }

    fn count(&self, term: Term) -> Result<usize, SearchError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        Ok(searcher.search(&query, &Count)?)
    }

    fn find_records(&self, term: Term) -> Result<Vec<IndexedRecord>, SearchError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let addresses = searcher.search(&query, &DocSetCollector)?;

        let mut records = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            let json = doc
                .get_first(self.schema.record)
                .and_then(|v| v.as_str())
                .ok_or_else(|| SearchError::SchemaMismatch("document without record".into()))?;
            records.push(serde_json::from_str::<IndexedRecord>(json)?);
        }
        records.sort_by_key(IndexedRecord::doc_id);
        Ok(records)
    }

    /// Replace documents with the same key and make the result visible.
    fn write_records(
        &self,
        writer: &mut IndexWriter,
        records: &[IndexedRecord],
    ) -> Result<(), SearchError> {
        for record in records {
            writer.delete_term(Term::from_field_text(self.schema.doc_id, &record.doc_id()));
            writer.add_document(record.to_document(&self.schema)?)?;
        }
        let opstamp = writer.commit()?;
        self.reader.reload()?;
        debug!(opstamp, documents = records.len(), "Committed search documents");
        Ok(())
    }

    fn update_records<F>(&self, terms: Vec<Term>, mut update: F) -> Result<usize, SearchError>
    where
        F: FnMut(&mut IndexedRecord),
    {
        let mut writer = self.lock_writer()?;
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for term in terms {
            for mut record in self.find_records(term)? {
                if seen.insert(record.doc_id()) {
                    update(&mut record);
                    records.push(record);
                }
            }
        }
        if !records.is_empty() {
            self.write_records(&mut writer, &records)?;
        }
        Ok(records.len())
    }

    /// A parent GUID addresses the object and its subobjects; a subobject
    /// GUID only itself.
    fn object_term(&self, guid: &Guid) -> Term {
        let field = if guid.is_sub_object() {
            self.schema.guid
        } else {
            self.schema.parent_guid
        };
        Term::from_field_text(field, &guid.to_string())
    }

    fn all_versions_term(&self, guid: &Guid) -> Term {
        Term::from_field_text(self.schema.object_key, &guid.object_key())
    }

    fn set_public(&self, terms: Vec<Term>, is_public: bool) -> Result<usize, SearchError> {
        self.update_records(terms, |record| record.is_public = is_public)
    }

    fn set_deleted(&self, guid: &Guid, is_deleted: bool) -> Result<usize, SearchError> {
        let touched =
            self.update_records(vec![self.all_versions_term(guid)], |record| {
                record.is_deleted = is_deleted
            })?;
        info!(guid = %guid, is_deleted, touched, "Updated deletion flag on all versions");
        Ok(touched)
    }
}

#[async_trait]
impl SearchStorage for TantivySearchStorage {
    async fn check_parent_guids_exist(
        &self,
        guids: &[Guid],
    ) -> Result<HashMap<Guid, bool>, SearchError> {
        let mut found = HashMap::with_capacity(guids.len());
        for guid in guids {
            let count = self.count(Term::from_field_text(self.schema.guid, &guid.to_string()))?;
            found.insert(guid.clone(), count > 0);
        }
        Ok(found)
    }

    async fn index_objects(
        &self,
        request: ObjectIndexingRequest<'_>,
    ) -> Result<usize, SearchError> {
        let rules = request.rules;
        let not_indexed: HashSet<String> = rules
            .indexing_rules()
            .iter()
            .filter(|r| r.is_not_indexed())
            .map(|r| r.key_name().to_string())
            .collect();
        let full_text: HashSet<String> = rules
            .indexing_rules()
            .iter()
            .filter(|r| r.is_full_text())
            .map(|r| r.key_name().to_string())
            .collect();

        let records: Vec<IndexedRecord> = request
            .objects
            .iter()
            .map(|(guid, parsed)| IndexedRecord {
                guid: guid.clone(),
                search_type: rules.global_object_type().clone(),
                ui_type_name: rules.ui_type_name().to_string(),
                object_name: request.source.name.clone(),
                creator: request.source.creator.clone(),
                copier: request.source.copier.clone(),
                timestamp: request.timestamp,
                is_public: request.is_public,
                is_deleted: false,
                data: parsed.json.clone(),
                parent_data: guid
                    .is_sub_object()
                    .then(|| request.parent_json.map(str::to_string))
                    .flatten(),
                keywords: parsed.keywords.clone(),
                not_indexed: not_indexed.clone(),
                full_text: full_text.clone(),
                source_tags: request.source.source_tags.clone(),
            })
            .collect();

        if records.is_empty() {
            debug!(
                guid = %request.guid,
                search_type = %rules.global_object_type(),
                "Nothing to index"
            );
            return Ok(0);
        }

        let mut writer = self.lock_writer()?;
        self.write_records(&mut writer, &records)?;
        info!(
            guid = %request.guid,
            search_type = %rules.global_object_type(),
            documents = records.len(),
            "Indexed objects"
        );
        Ok(records.len())
    }

    async fn delete_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.set_deleted(guid, true)
    }

    async fn undelete_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.set_deleted(guid, false)
    }

    async fn publish_objects(&self, guids: &[Guid]) -> Result<usize, SearchError> {
        let terms = guids.iter().map(|g| self.object_term(g)).collect();
        self.set_public(terms, true)
    }

    async fn unpublish_objects(&self, guids: &[Guid]) -> Result<usize, SearchError> {
        let terms = guids.iter().map(|g| self.object_term(g)).collect();
        self.set_public(terms, false)
    }

    async fn publish_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.set_public(vec![self.all_versions_term(guid)], true)
    }

    async fn unpublish_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.set_public(vec![self.all_versions_term(guid)], false)
    }

    async fn set_name_on_all_object_versions(
        &self,
        guid: &Guid,
        name: &str,
    ) -> Result<usize, SearchError> {
        let touched = self.update_records(vec![self.all_versions_term(guid)], |record| {
            record.object_name = name.to_string()
        })?;
        info!(guid = %guid, name, touched, "Renamed all object versions");
        Ok(touched)
    }

    async fn get_objects_by_ids(
        &self,
        guids: &[Guid],
        post: PostProcessing,
    ) -> Result<Vec<ObjectData>, SearchError> {
        let mut objects = Vec::new();
        for guid in guids {
            let term = Term::from_field_text(self.schema.guid, &guid.to_string());
            for record in self.find_records(term)? {
                if !record.is_deleted {
                    objects.push(record.to_object_data(&post)?);
                }
            }
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_rules::{IndexingRules, ObjectJsonPath, SubObjectSpec};
    use indexer_types::{SearchObjectType, StorageObjectType};
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> TantivySearchStorage {
        TantivySearchStorage::open(SearchIndexConfig::new(dir.path())).unwrap()
    }

    fn genome_rules() -> ObjectTypeParsingRules {
        ObjectTypeParsingRules::builder(
            SearchObjectType::new("Genome", 1).unwrap(),
            StorageObjectType::new("WS", "Genome"),
        )
        .with_indexing_rule(
            IndexingRules::from_path(ObjectJsonPath::new("name").unwrap())
                .with_full_text(true)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
    }

    fn feature_rules() -> ObjectTypeParsingRules {
        ObjectTypeParsingRules::builder(
            SearchObjectType::new("GenomeFeature", 1).unwrap(),
            StorageObjectType::new("WS", "Genome"),
        )
        .with_sub_object(SubObjectSpec {
            sub_object_type: "feature".to_string(),
            sub_objects_path: ObjectJsonPath::new("features/[*]").unwrap(),
            primary_key_path: ObjectJsonPath::new("id").unwrap(),
        })
        .with_indexing_rule(
            IndexingRules::from_path(ObjectJsonPath::new("id").unwrap())
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
    }

    fn parsed(json: &str, key: &str, value: serde_json::Value) -> ParsedObject {
        let mut parsed = ParsedObject::new(json);
        parsed.add_values(key, vec![value]);
        parsed
    }

    async fn index_genome(storage: &TantivySearchStorage, guid: &Guid, name: &str) {
        let objects = BTreeMap::from([(
            guid.clone(),
            parsed(&json!({ "name": name }).to_string(), "name", json!(name)),
        )]);
        let source = SourceData::new(name, "alice");
        let rules = genome_rules();
        let written = storage
            .index_objects(ObjectIndexingRequest {
                rules: &rules,
                source: &source,
                timestamp: Utc::now(),
                parent_json: None,
                guid,
                objects: &objects,
                is_public: false,
            })
            .await
            .unwrap();
        assert_eq!(written, 1);
    }

    async fn index_features(storage: &TantivySearchStorage, guid: &Guid, ids: &[&str]) {
        let objects: BTreeMap<Guid, ParsedObject> = ids
            .iter()
            .map(|id| {
                (
                    guid.with_sub_object("feature", *id),
                    parsed(&json!({ "id": id }).to_string(), "id", json!(id)),
                )
            })
            .collect();
        let source = SourceData::new("genome", "alice");
        let rules = feature_rules();
        storage
            .index_objects(ObjectIndexingRequest {
                rules: &rules,
                source: &source,
                timestamp: Utc::now(),
                parent_json: Some(r#"{"name":"genome"}"#),
                guid,
                objects: &objects,
                is_public: false,
            })
            .await
            .unwrap();
    }

    fn guid(s: &str) -> Guid {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_index_and_read_back() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let g = guid("WS:1/2/3");

        let before = storage.check_parent_guids_exist(&[g.clone()]).await.unwrap();
        assert!(!before[&g]);

        index_genome(&storage, &g, "E. coli").await;

        let after = storage.check_parent_guids_exist(&[g.clone()]).await.unwrap();
        assert!(after[&g]);
        assert_eq!(storage.count_keyword("name", "E. coli").unwrap(), 1);

        let objects = storage
            .get_objects_by_ids(&[g.clone()], PostProcessing::full())
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].object_name, "E. coli");
        assert_eq!(objects[0].creator, "alice");
        assert_eq!(objects[0].keyword("name"), Some(&[json!("E. coli")][..]));
        assert_eq!(objects[0].data, Some(json!({ "name": "E. coli" })));
        assert!(!objects[0].is_public);
    }

    #[tokio::test]
    async fn test_reindex_replaces_document() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let g = guid("WS:1/2/3");

        index_genome(&storage, &g, "first").await;
        index_genome(&storage, &g, "second").await;

        assert_eq!(storage.document_count(), 1);
        assert_eq!(storage.count_keyword("name", "first").unwrap(), 0);
        let objects = storage
            .get_objects_by_ids(&[g], PostProcessing::ids_only())
            .await
            .unwrap();
        assert_eq!(objects[0].object_name, "second");
    }

    #[tokio::test]
    async fn test_subobjects_do_not_mark_parent_present() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let g = guid("WS:1/2/3");

        index_features(&storage, &g, &["f1", "f2"]).await;
        let exists = storage.check_parent_guids_exist(&[g.clone()]).await.unwrap();
        assert!(!exists[&g]);

        let feature = storage
            .get_objects_by_ids(&[g.with_sub_object("feature", "f1")], PostProcessing::full())
            .await
            .unwrap();
        assert_eq!(feature.len(), 1);
        assert_eq!(feature[0].parent_guid, Some(g.clone()));
        assert_eq!(feature[0].parent_data, Some(json!({ "name": "genome" })));

        index_genome(&storage, &g, "genome").await;
        let exists = storage.check_parent_guids_exist(&[g.clone()]).await.unwrap();
        assert!(exists[&g]);
    }

    #[tokio::test]
    async fn test_delete_and_undelete_all_versions() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let v1 = guid("WS:1/2/1");
        let v2 = guid("WS:1/2/2");
        let other = guid("WS:1/5/1");

        index_genome(&storage, &v1, "one").await;
        index_genome(&storage, &v2, "two").await;
        index_features(&storage, &v2, &["f1"]).await;
        index_genome(&storage, &other, "other").await;

        let touched = storage.delete_all_versions(&v1).await.unwrap();
        assert_eq!(touched, 3);
        let visible = storage
            .get_objects_by_ids(
                &[v1.clone(), v2.clone(), other.clone()],
                PostProcessing::ids_only(),
            )
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].guid, other);

        storage.undelete_all_versions(&v2).await.unwrap();
        let visible = storage
            .get_objects_by_ids(&[v1, v2], PostProcessing::ids_only())
            .await
            .unwrap();
        assert_eq!(visible.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_object_covers_subobjects() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let v1 = guid("WS:1/2/1");
        let v2 = guid("WS:1/2/2");

        index_features(&storage, &v1, &["f1"]).await;
        index_genome(&storage, &v1, "one").await;
        index_genome(&storage, &v2, "two").await;

        assert_eq!(storage.publish_objects(&[v1.clone()]).await.unwrap(), 2);
        let objects = storage
            .get_objects_by_ids(
                &[v1.clone(), v1.with_sub_object("feature", "f1"), v2.clone()],
                PostProcessing::ids_only(),
            )
            .await
            .unwrap();
        let public: Vec<bool> = objects.iter().map(|o| o.is_public).collect();
        assert_eq!(public, vec![true, true, false]);

        storage.publish_all_versions(&v1).await.unwrap();
        storage.unpublish_objects(&[v1.clone()]).await.unwrap();
        let objects = storage
            .get_objects_by_ids(&[v1.clone(), v2.clone()], PostProcessing::ids_only())
            .await
            .unwrap();
        let public: Vec<bool> = objects.iter().map(|o| o.is_public).collect();
        assert_eq!(public, vec![false, true]);

        storage.unpublish_all_versions(&v2).await.unwrap();
        let objects = storage
            .get_objects_by_ids(&[v2], PostProcessing::ids_only())
            .await
            .unwrap();
        assert!(!objects[0].is_public);
    }

    #[tokio::test]
    async fn test_rename_all_versions() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let v1 = guid("WS:1/2/1");
        let v2 = guid("WS:1/2/2");
        index_genome(&storage, &v1, "old").await;
        index_genome(&storage, &v2, "old").await;

        let touched = storage
            .set_name_on_all_object_versions(&v2, "new")
            .await
            .unwrap();
        assert_eq!(touched, 2);
        let names: Vec<String> = storage
            .get_objects_by_ids(&[v1, v2], PostProcessing::ids_only())
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.object_name)
            .collect();
        assert_eq!(names, vec!["new", "new"]);
    }

    #[tokio::test]
    async fn test_mutation_on_unknown_object_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        assert_eq!(storage.delete_all_versions(&guid("WS:9/9")).await.unwrap(), 0);
        assert_eq!(storage.publish_objects(&[guid("WS:9/9/1")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let g = guid("WS:1/2/3");
        {
            let storage = open(&dir);
            index_genome(&storage, &g, "kept").await;
        }
        let storage = open(&dir);
        let exists = storage.check_parent_guids_exist(&[g.clone()]).await.unwrap();
        assert!(exists[&g]);
    }
}

//! Recursive object indexer.
//!
//! Loads one object, applies every rule set registered for its storage type
//! and writes the results. Subobject rule sets are written before parent rule
//! sets, so an object whose parent GUID is present in the search storage has
//! all of its subobjects indexed too.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use indexer_rules::{ObjectTypeParsingRules, TypeStorage};
use indexer_search::{ObjectIndexingRequest, SearchStorage};
use indexer_types::{Guid, ObjectRefPath, ParsedObject, StorageObjectType};

use crate::error::IndexingError;
use crate::handler::HandlerRegistry;
use crate::lookup::ObjectLookupProvider;
use crate::parse::{parse_keywords, prepare_rule_set};
use crate::retrier::Retrier;

pub struct ObjectIndexer {
    handlers: HandlerRegistry,
    type_storage: Arc<dyn TypeStorage>,
    search: Arc<dyn SearchStorage>,
    retrier: Retrier,
    temp_dir: PathBuf,
    max_subobjects: usize,
}

impl ObjectIndexer {
    pub fn new(
        handlers: HandlerRegistry,
        type_storage: Arc<dyn TypeStorage>,
        search: Arc<dyn SearchStorage>,
        retrier: Retrier,
        temp_dir: impl Into<PathBuf>,
        max_subobjects: usize,
    ) -> Self {
        Self {
            handlers,
            type_storage,
            search,
            retrier,
            temp_dir: temp_dir.into(),
            max_subobjects,
        }
    }

    /// Index one object and, on demand, every unindexed object it references.
    ///
    /// `ref_path` is the traversal leading to the object; `None` starts a new
    /// one rooted at `guid`.
    pub async fn index_object(
        &self,
        guid: &Guid,
        storage_type: &StorageObjectType,
        timestamp: DateTime<Utc>,
        is_public: bool,
        ref_path: Option<ObjectRefPath>,
    ) -> Result<(), IndexingError> {
        let path = ref_path.unwrap_or_else(|| ObjectRefPath::root(guid.clone()));
        let mut lookup = ObjectLookupProvider::new(self);
        self.index_with_lookup(
            guid.clone(),
            storage_type.clone(),
            timestamp,
            is_public,
            path,
            &mut lookup,
        )
        .await
    }

    /// Whether any rule set applies to the storage type.
    pub fn is_supported(&self, storage_type: &StorageObjectType) -> Result<bool, IndexingError> {
        Ok(!self
            .type_storage
            .list_object_type_parsing_rules_for(storage_type)?
            .is_empty())
    }

    pub(crate) fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub(crate) fn type_storage(&self) -> &dyn TypeStorage {
        self.type_storage.as_ref()
    }

    pub(crate) fn search(&self) -> &dyn SearchStorage {
        self.search.as_ref()
    }

    pub(crate) fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Index one object of the traversal. The object counts as in progress
    /// until its own indexing returns.
    pub(crate) fn index_with_lookup<'s>(
        &'s self,
        guid: Guid,
        storage_type: StorageObjectType,
        timestamp: DateTime<Utc>,
        is_public: bool,
        path: ObjectRefPath,
        lookup: &'s mut ObjectLookupProvider<'_>,
    ) -> BoxFuture<'s, Result<(), IndexingError>> {
        Box::pin(async move {
            lookup.mark_in_progress(&guid);
            let result = self
                .index_marked(&guid, &storage_type, timestamp, is_public, &path, lookup)
                .await;
            lookup.clear_in_progress(&guid);
            result
        })
    }

    async fn index_marked(
        &self,
        guid: &Guid,
        storage_type: &StorageObjectType,
        timestamp: DateTime<Utc>,
        is_public: bool,
        path: &ObjectRefPath,
        lookup: &mut ObjectLookupProvider<'_>,
    ) -> Result<(), IndexingError> {
        let rule_sets = self.ordered_rule_sets(storage_type)?;
        if rule_sets.is_empty() {
            debug!(guid = %guid, storage_type = %storage_type, "No rules for storage type");
            return Ok(());
        }

        let handler = self.handlers.get(&guid.storage_code)?;
        let temp_file = self
            .retrier
            .retry(None, || async { self.create_temp_file() })
            .await?;
        let source = self
            .retrier
            .retry(None, || handler.load(path, temp_file.path()))
            .await?;
        let object = read_object(temp_file.path()).await?;
        drop(temp_file);

        // All subobject checks happen before the first write.
        let prepared = rule_sets
            .into_iter()
            .map(|rules| prepare_rule_set(rules, &object, guid, self.max_subobjects))
            .collect::<Result<Vec<_>, _>>()?;

        for rule_set in &prepared {
            let rules = rule_set.rules.as_ref();
            let mut parsed = BTreeMap::new();
            for (object_guid, fragment) in &rule_set.objects {
                let keywords =
                    parse_keywords(rules, fragment, &rule_set.parent, path, lookup).await?;
                parsed.insert(
                    object_guid.clone(),
                    ParsedObject {
                        json: fragment.to_string(),
                        keywords,
                    },
                );
            }

            let parent_json = rules
                .is_sub_object_rules()
                .then(|| rule_set.parent.to_string());
            let request = ObjectIndexingRequest {
                rules,
                source: &source,
                timestamp,
                parent_json: parent_json.as_deref(),
                guid,
                objects: &parsed,
                is_public,
            };
            self.retrier
                .retry(None, || async {
                    self.search
                        .index_objects(request)
                        .await
                        .map_err(IndexingError::from)
                })
                .await?;
        }

        info!(
            guid = %guid,
            storage_type = %storage_type,
            rule_sets = prepared.len(),
            depth = path.len(),
            "Indexed object"
        );
        Ok(())
    }

    /// Subobject rule sets first, then by search type.
    fn ordered_rule_sets(
        &self,
        storage_type: &StorageObjectType,
    ) -> Result<Vec<Arc<ObjectTypeParsingRules>>, IndexingError> {
        let mut rule_sets = self
            .type_storage
            .list_object_type_parsing_rules_for(storage_type)?;
        rule_sets.sort_by(|a, b| {
            b.is_sub_object_rules()
                .cmp(&a.is_sub_object_rules())
                .then_with(|| a.global_object_type().cmp(b.global_object_type()))
        });
        Ok(rule_sets)
    }

    fn create_temp_file(&self) -> Result<NamedTempFile, IndexingError> {
        NamedTempFile::new_in(&self.temp_dir).map_err(|e| {
            IndexingError::FatalRetriable(format!(
                "cannot create temp file in {}: {}",
                self.temp_dir.display(),
                e
            ))
        })
    }
}

async fn read_object(path: &Path) -> Result<Value, IndexingError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        IndexingError::Retriable(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

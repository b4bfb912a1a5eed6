//! Per-traversal caches for reference resolution and lookups.
//!
//! One provider is created for each top-level [`ObjectIndexer::index_object`]
//! call, passed by `&mut` through the whole recursion and dropped on return.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use indexer_rules::ObjectTypeParsingRules;
use indexer_search::{ObjectData, PostProcessing};
use indexer_types::{Guid, ObjectRefPath, SearchObjectType};

use crate::error::{IndexingError, UnprocessableReason};
use crate::handler::ResolvedReference;
use crate::indexer::ObjectIndexer;

pub struct ObjectLookupProvider<'a> {
    indexer: &'a ObjectIndexer,
    /// `{storage code}|{reference path}` -> resolution
    resolved: HashMap<String, ResolvedReference>,
    objects: HashMap<Guid, Option<ObjectData>>,
    types: HashMap<Guid, Vec<SearchObjectType>>,
    descriptors: HashMap<String, Arc<ObjectTypeParsingRules>>,
    /// Objects of this traversal whose indexing has not returned yet
    in_progress: HashSet<Guid>,
}

impl<'a> ObjectLookupProvider<'a> {
    pub(crate) fn new(indexer: &'a ObjectIndexer) -> Self {
        Self {
            indexer,
            resolved: HashMap::new(),
            objects: HashMap::new(),
            types: HashMap::new(),
            descriptors: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    pub(crate) fn mark_in_progress(&mut self, guid: &Guid) {
        self.in_progress.insert(guid.clone());
    }

    pub(crate) fn clear_in_progress(&mut self, guid: &Guid) {
        self.in_progress.remove(guid);
    }

    /// Whether the object is being indexed higher up this traversal. Such
    /// objects may not be in the search storage yet.
    pub fn is_in_progress(&self, guid: &Guid) -> bool {
        self.in_progress.contains(guid)
    }

    /// Resolve references made by the object at the end of `caller_path`.
    ///
    /// Targets not yet in the search storage are indexed (not public) before
    /// this returns, unless their indexing is already under way higher up
    /// the traversal. Returns resolved GUIDs in reference order; references
    /// the handler could not resolve are left out.
    pub async fn resolve_refs(
        &mut self,
        caller_path: &ObjectRefPath,
        refs: &[String],
    ) -> Result<Vec<Guid>, IndexingError> {
        let indexer = self.indexer;
        let storage_code = caller_path.target().storage_code.clone();
        let handler = indexer.handlers().get(&storage_code)?;
        let paths = handler.build_reference_paths(caller_path, refs)?;
        let cache_key = |reference: &str| -> Result<String, IndexingError> {
            paths
                .get(reference)
                .map(|path| format!("{}|{}", storage_code, path))
                .ok_or_else(|| {
                    IndexingError::unprocessable(
                        UnprocessableReason::Other,
                        format!("no reference path built for {}", reference),
                    )
                })
        };

        let mut uncached: Vec<String> = Vec::new();
        for reference in refs {
            let cached = self.resolved.contains_key(&cache_key(reference)?);
            if !cached && !uncached.contains(reference) {
                uncached.push(reference.clone());
            }
        }

        if !uncached.is_empty() {
            let fresh = indexer
                .retrier()
                .retry(None, || handler.resolve_references(caller_path, &uncached))
                .await?;
            let guids: Vec<Guid> = fresh.iter().map(|r| r.guid.clone()).collect();
            let present = indexer
                .retrier()
                .retry(None, || async {
                    indexer
                        .search()
                        .check_parent_guids_exist(&guids)
                        .await
                        .map_err(IndexingError::from)
                })
                .await?;
            debug!(
                caller = %caller_path,
                requested = uncached.len(),
                resolved = fresh.len(),
                "Resolved references"
            );

            for resolution in &fresh {
                self.resolved
                    .insert(cache_key(&resolution.reference)?, resolution.clone());
            }

            for resolution in fresh {
                let indexed = present.get(&resolution.guid).copied().unwrap_or(false);
                if indexed || self.in_progress.contains(&resolution.guid) {
                    continue;
                }
                debug!(
                    caller = %caller_path,
                    target = %resolution.guid,
                    "Indexing referenced object"
                );
                indexer
                    .index_with_lookup(
                        resolution.guid.clone(),
                        resolution.storage_type,
                        resolution.timestamp,
                        false,
                        caller_path.append(resolution.guid),
                        self,
                    )
                    .await?;
            }
        }

        Ok(refs
            .iter()
            .filter_map(|reference| {
                let key = cache_key(reference).ok()?;
                self.resolved.get(&key).map(|r| r.guid.clone())
            })
            .collect())
    }

    /// Indexed objects with keywords, by GUID. GUIDs not in the search
    /// storage are absent from the result.
    ///
    /// Misses are cached, except for objects still being indexed in this
    /// traversal.
    pub async fn lookup_objects_by_guid(
        &mut self,
        guids: &[Guid],
    ) -> Result<HashMap<Guid, ObjectData>, IndexingError> {
        let missing: Vec<Guid> = unique_missing(guids, |g| {
            self.objects.get(g).is_some_and(Option::is_some)
                || (self.objects.contains_key(g) && !self.in_progress.contains(g))
        });
        if !missing.is_empty() {
            let post = PostProcessing::ids_only().with_keywords(true);
            let found = self.fetch(&missing, post).await?;
            for object in found {
                let types = self.types.entry(object.guid.clone()).or_default();
                if !types.contains(&object.search_type) {
                    types.push(object.search_type.clone());
                }
                self.objects
                    .entry(object.guid.clone())
                    .or_insert(None)
                    .get_or_insert(object);
            }
            for guid in missing {
                if !self.in_progress.contains(&guid) {
                    self.objects.entry(guid).or_insert(None);
                }
            }
        }

        Ok(guids
            .iter()
            .filter_map(|g| {
                self.objects
                    .get(g)
                    .and_then(Option::as_ref)
                    .map(|o| (g.clone(), o.clone()))
            })
            .collect())
    }

    /// Search types each GUID is indexed under. An object still being
    /// indexed in this traversal maps to the types written so far, possibly
    /// none, and is fetched again on the next call.
    pub async fn get_types_for_guids(
        &mut self,
        guids: &[Guid],
    ) -> Result<HashMap<Guid, Vec<SearchObjectType>>, IndexingError> {
        let missing: Vec<Guid> = unique_missing(guids, |g| {
            self.types.contains_key(g) && !self.in_progress.contains(g)
        });
        let mut pending: HashMap<Guid, Vec<SearchObjectType>> = HashMap::new();
        if !missing.is_empty() {
            let found = self.fetch(&missing, PostProcessing::ids_only()).await?;
            for guid in &missing {
                pending.insert(guid.clone(), Vec::new());
            }
            for object in found {
                if let Some(types) = pending.get_mut(&object.guid) {
                    if !types.contains(&object.search_type) {
                        types.push(object.search_type);
                    }
                }
            }
            for (guid, types) in &pending {
                if !self.in_progress.contains(guid) {
                    self.types.insert(guid.clone(), types.clone());
                }
            }
        }

        Ok(guids
            .iter()
            .filter_map(|g| {
                pending
                    .get(g)
                    .or_else(|| self.types.get(g))
                    .map(|t| (g.clone(), t.clone()))
            })
            .collect())
    }

    /// Newest rule set of a search type.
    pub fn get_type_descriptor(
        &mut self,
        type_name: &str,
    ) -> Result<Arc<ObjectTypeParsingRules>, IndexingError> {
        if let Some(rules) = self.descriptors.get(type_name) {
            return Ok(rules.clone());
        }
        let rules = self
            .indexer
            .type_storage()
            .get_latest_parsing_rules(type_name)?;
        self.descriptors
            .insert(type_name.to_string(), rules.clone());
        Ok(rules)
    }

    async fn fetch(
        &self,
        guids: &[Guid],
        post: PostProcessing,
    ) -> Result<Vec<ObjectData>, IndexingError> {
        let search = self.indexer.search();
        self.indexer
            .retrier()
            .retry(None, || async {
                search
                    .get_objects_by_ids(guids, post)
                    .await
                    .map_err(IndexingError::from)
            })
            .await
    }
}

fn unique_missing(guids: &[Guid], cached: impl Fn(&Guid) -> bool) -> Vec<Guid> {
    let mut seen = HashSet::new();
    guids
        .iter()
        .filter(|g| !cached(*g) && seen.insert(*g))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use indexer_types::StorageObjectType;

    fn type_names(types: &HashMap<Guid, Vec<SearchObjectType>>, guid: &Guid) -> Vec<String> {
        types[guid].iter().map(|t| t.type_name().to_string()).collect()
    }

    #[tokio::test]
    async fn test_types_not_duplicated_across_lookups() {
        let fixture = Fixture::new(genome_handler());
        let indexer = fixture.indexer(100);
        let assembly = guid(ASSEMBLY);
        let assembly_type = StorageObjectType::new("WS", "Assembly");
        indexer
            .index_object(&assembly, &assembly_type, timestamp(), false, None)
            .await
            .unwrap();

        let mut lookup = ObjectLookupProvider::new(&indexer);
        lookup.get_types_for_guids(slice(&assembly)).await.unwrap();
        let objects = lookup.lookup_objects_by_guid(slice(&assembly)).await.unwrap();
        assert!(objects.contains_key(&assembly));

        let types = lookup.get_types_for_guids(slice(&assembly)).await.unwrap();
        assert_eq!(type_names(&types, &assembly), vec!["Assembly".to_string()]);
    }

    #[tokio::test]
    async fn test_in_progress_object_is_fetched_again() {
        let fixture = Fixture::new(genome_handler());
        let indexer = fixture.indexer(100);
        let assembly = guid(ASSEMBLY);

        let mut lookup = ObjectLookupProvider::new(&indexer);
        lookup.mark_in_progress(&assembly);
        let types = lookup.get_types_for_guids(slice(&assembly)).await.unwrap();
        assert!(types[&assembly].is_empty());
        assert!(lookup.lookup_objects_by_guid(slice(&assembly)).await.unwrap().is_empty());

        // Written later in the same traversal.
        let assembly_type = StorageObjectType::new("WS", "Assembly");
        indexer
            .index_object(&assembly, &assembly_type, timestamp(), false, None)
            .await
            .unwrap();

        let types = lookup.get_types_for_guids(slice(&assembly)).await.unwrap();
        assert_eq!(type_names(&types, &assembly), vec!["Assembly".to_string()]);
        let objects = lookup.lookup_objects_by_guid(slice(&assembly)).await.unwrap();
        assert!(objects.contains_key(&assembly));
    }

    #[tokio::test]
    async fn test_missing_object_cached_as_absent() {
        let fixture = Fixture::new(genome_handler());
        let indexer = fixture.indexer(100);
        let missing = guid("WS:1/99/1");

        let mut lookup = ObjectLookupProvider::new(&indexer);
        assert!(lookup.lookup_objects_by_guid(slice(&missing)).await.unwrap().is_empty());
        assert!(lookup.objects.get(&missing).is_some_and(Option::is_none));
        let types = lookup.get_types_for_guids(slice(&missing)).await.unwrap();
        assert!(types[&missing].is_empty());
        assert!(lookup.types.contains_key(&missing));
    }

    fn slice(guid: &Guid) -> &[Guid] {
        std::slice::from_ref(guid)
    }
}

//! Type rule lookup.
//!
//! Given a storage object type, the applicable rule sets are chosen as:
//! 1. the mapping's override for the storage type version, if present
//! 2. otherwise the mapping's default set
//! 3. with no mapping at all, the newest version of every search type whose
//!    rules declare this storage type directly

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexer_types::{SearchObjectType, StorageObjectType};
use tracing::debug;

use crate::error::RulesError;
use crate::mapping::{SearchTypeRef, TypeMapping};
use crate::parsing_rules::ObjectTypeParsingRules;

/// Read-only access to loaded type rules.
pub trait TypeStorage: Send + Sync {
    /// The exact rule set for a search type version.
    fn get_object_type_parsing_rules(
        &self,
        search_type: &SearchObjectType,
    ) -> Result<Arc<ObjectTypeParsingRules>, RulesError>;

    /// The newest rule set of a search type, by name.
    fn get_latest_parsing_rules(
        &self,
        type_name: &str,
    ) -> Result<Arc<ObjectTypeParsingRules>, RulesError>;

    /// The newest version of every search type.
    fn list_object_type_parsing_rules(&self) -> Vec<Arc<ObjectTypeParsingRules>>;

    /// Rule sets applicable to a storage object type.
    fn list_object_type_parsing_rules_for(
        &self,
        storage_type: &StorageObjectType,
    ) -> Result<Vec<Arc<ObjectTypeParsingRules>>, RulesError>;
}

/// In-memory type storage built once at startup.
#[derive(Debug, Default)]
pub struct MemoryTypeStorage {
    /// search type name -> version -> rules
    rules: HashMap<String, BTreeMap<u32, Arc<ObjectTypeParsingRules>>>,
    /// (storage code, storage type name) -> mapping
    mappings: HashMap<(String, String), TypeMapping>,
}

impl MemoryTypeStorage {
    /// Build from rule sets and mappings. Duplicate search type versions or
    /// duplicate mappings are rejected, as are mappings naming unknown types.
    pub fn new(
        parsing_rules: Vec<ObjectTypeParsingRules>,
        mappings: Vec<TypeMapping>,
    ) -> Result<Self, RulesError> {
        let mut storage = Self::default();
        for rules in parsing_rules {
            let search_type = rules.global_object_type().clone();
            let versions = storage
                .rules
                .entry(search_type.type_name().to_string())
                .or_default();
            if versions.contains_key(&search_type.version()) {
                return Err(RulesError::InvalidRule(format!(
                    "duplicate rules for search type {}",
                    search_type
                )));
            }
            versions.insert(search_type.version(), Arc::new(rules));
        }

        for mapping in mappings {
            for type_ref in mapping.all_search_types() {
                storage.resolve_ref(type_ref)?;
            }
            let key = (
                mapping.storage_code().to_string(),
                mapping.storage_type().to_string(),
            );
            if storage.mappings.contains_key(&key) {
                return Err(RulesError::InvalidRule(format!(
                    "duplicate mapping for storage type {}:{}",
                    key.0, key.1
                )));
            }
            storage.mappings.insert(key, mapping);
        }
        Ok(storage)
    }

    /// Number of search types (not versions) loaded.
    pub fn search_type_count(&self) -> usize {
        self.rules.len()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    fn resolve_ref(
        &self,
        type_ref: &SearchTypeRef,
    ) -> Result<Arc<ObjectTypeParsingRules>, RulesError> {
        let versions = self
            .rules
            .get(&type_ref.type_name)
            .ok_or_else(|| RulesError::NotFound(type_ref.type_name.clone()))?;
        let found = match type_ref.version {
            Some(v) => versions.get(&v),
            None => versions.values().next_back(),
        };
        found
            .cloned()
            .ok_or_else(|| RulesError::NotFound(type_ref.to_string()))
    }
}

impl TypeStorage for MemoryTypeStorage {
    fn get_object_type_parsing_rules(
        &self,
        search_type: &SearchObjectType,
    ) -> Result<Arc<ObjectTypeParsingRules>, RulesError> {
        self.resolve_ref(&SearchTypeRef::versioned(
            search_type.type_name(),
            search_type.version(),
        ))
    }

    fn get_latest_parsing_rules(
        &self,
        type_name: &str,
    ) -> Result<Arc<ObjectTypeParsingRules>, RulesError> {
        self.resolve_ref(&SearchTypeRef::latest(type_name))
    }

    fn list_object_type_parsing_rules(&self) -> Vec<Arc<ObjectTypeParsingRules>> {
        let mut latest: Vec<Arc<ObjectTypeParsingRules>> = self
            .rules
            .values()
            .filter_map(|versions| versions.values().next_back().cloned())
            .collect();
        latest.sort_by(|a, b| a.global_object_type().cmp(b.global_object_type()));
        latest
    }

    fn list_object_type_parsing_rules_for(
        &self,
        storage_type: &StorageObjectType,
    ) -> Result<Vec<Arc<ObjectTypeParsingRules>>, RulesError> {
        let key = (
            storage_type.storage_code.clone(),
            storage_type.type_name.clone(),
        );
        if let Some(mapping) = self.mappings.get(&key) {
            let refs = mapping.search_types(storage_type.version);
            debug!(
                storage_type = %storage_type,
                search_types = refs.len(),
                "Resolved search types through mapping"
            );
            return refs.iter().map(|r| self.resolve_ref(r)).collect();
        }

        let target = storage_type.unversioned();
        Ok(self
            .list_object_type_parsing_rules()
            .into_iter()
            .filter(|rules| rules.storage_object_type().unversioned() == target)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(name: &str, version: u32, storage_type: &str) -> ObjectTypeParsingRules {
        ObjectTypeParsingRules::builder(
            SearchObjectType::new(name, version).unwrap(),
            StorageObjectType::new("WS", storage_type),
        )
        .build()
        .unwrap()
    }

    fn names(found: &[Arc<ObjectTypeParsingRules>]) -> Vec<String> {
        found
            .iter()
            .map(|r| r.global_object_type().to_string())
            .collect()
    }

    #[test]
    fn test_exact_version_lookup() {
        let storage = MemoryTypeStorage::new(
            vec![rules("Genome", 1, "Genome"), rules("Genome", 2, "Genome")],
            vec![],
        )
        .unwrap();
        let found = storage
            .get_object_type_parsing_rules(&SearchObjectType::new("Genome", 1).unwrap())
            .unwrap();
        assert_eq!(found.global_object_type().version(), 1);
        assert!(matches!(
            storage.get_object_type_parsing_rules(&SearchObjectType::new("Genome", 3).unwrap()),
            Err(RulesError::NotFound(_))
        ));
        let latest = storage.get_latest_parsing_rules("Genome").unwrap();
        assert_eq!(latest.global_object_type().version(), 2);
    }

    #[test]
    fn test_unmapped_storage_type_uses_newest_versions() {
        let storage = MemoryTypeStorage::new(
            vec![
                rules("Genome", 1, "Genome"),
                rules("Genome", 2, "Genome"),
                rules("GenomeFeature", 1, "Genome"),
                rules("Assembly", 1, "Assembly"),
            ],
            vec![],
        )
        .unwrap();

        let found = storage
            .list_object_type_parsing_rules_for(&StorageObjectType::versioned("WS", "Genome", 7))
            .unwrap();
        assert_eq!(names(&found), vec!["Genome_2", "GenomeFeature_1"]);
    }

    #[test]
    fn test_version_override_falls_back_to_default_set() {
        let mapping = TypeMapping::new("WS", "Genome", vec![SearchTypeRef::latest("Genome")])
            .with_version_override(3, vec![SearchTypeRef::versioned("GenomeOld", 1)]);
        let storage = MemoryTypeStorage::new(
            vec![
                rules("Genome", 1, "Genome"),
                rules("Genome", 2, "Genome"),
                rules("GenomeOld", 1, "Genome"),
            ],
            vec![mapping],
        )
        .unwrap();

        let v3 = storage
            .list_object_type_parsing_rules_for(&StorageObjectType::versioned("WS", "Genome", 3))
            .unwrap();
        assert_eq!(names(&v3), vec!["GenomeOld_1"]);

        let v4 = storage
            .list_object_type_parsing_rules_for(&StorageObjectType::versioned("WS", "Genome", 4))
            .unwrap();
        assert_eq!(names(&v4), vec!["Genome_2"]);
    }

    #[test]
    fn test_unknown_storage_type_is_unsupported() {
        let storage = MemoryTypeStorage::new(vec![rules("Genome", 1, "Genome")], vec![]).unwrap();
        let found = storage
            .list_object_type_parsing_rules_for(&StorageObjectType::new("WS", "Reads"))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_dangling_mappings() {
        assert!(MemoryTypeStorage::new(
            vec![rules("Genome", 1, "Genome"), rules("Genome", 1, "Genome")],
            vec![]
        )
        .is_err());

        let dangling = TypeMapping::new("WS", "Genome", vec![SearchTypeRef::latest("Missing")]);
        let result = MemoryTypeStorage::new(vec![rules("Genome", 1, "Genome")], vec![dangling]);
        assert!(result.is_err());
    }
}

//! YAML loading of type rules and type mappings.
//!
//! A rules directory holds one type document per `*.yaml`/`*.yml` file and
//! mapping documents under a `mappings/` subdirectory.
//!
//! Type document:
//!
//! ```yaml
//! storage-type: WS
//! storage-object-type: KBaseGenomes.Genome
//! global-object-type: Genome
//! ui-type-name: Genome
//! versions:
//!   - indexing-rules:
//!       - path: scientific_name
//!         full-text: true
//!       - path: dna_size
//!         keyword-type: integer
//! ```
//!
//! Mapping document:
//!
//! ```yaml
//! storage-type: WS
//! types:
//!   KBaseGenomes.Genome:
//!     default: [Genome]
//!     versions:
//!       3: [GenomeOld_1]
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use indexer_types::{SearchObjectType, StorageObjectType};

use crate::error::RulesError;
use crate::indexing_rules::IndexingRules;
use crate::keyword_type::KeywordType;
use crate::mapping::{SearchTypeRef, TypeMapping};
use crate::parsing_rules::{ObjectTypeParsingRules, SubObjectSpec};
use crate::path::ObjectJsonPath;
use crate::storage::MemoryTypeStorage;

/// Name of the subdirectory holding mapping documents.
pub const MAPPINGS_DIR: &str = "mappings";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TypeDocument {
    storage_type: String,
    storage_object_type: String,
    global_object_type: String,
    #[serde(default)]
    ui_type_name: Option<String>,
    versions: Vec<VersionDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct VersionDocument {
    #[serde(default)]
    inner_sub_type: Option<String>,
    #[serde(default)]
    path_to_sub_objects: Option<String>,
    #[serde(default)]
    primary_key_path: Option<String>,
    #[serde(default)]
    indexing_rules: Vec<RuleDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RuleDocument {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    source_key: Option<String>,
    #[serde(default)]
    key_name: Option<String>,
    #[serde(default)]
    from_parent: bool,
    #[serde(default)]
    full_text: bool,
    #[serde(default)]
    keyword_type: Option<String>,
    #[serde(default)]
    transform: Option<String>,
    #[serde(default)]
    not_indexed: bool,
    #[serde(default)]
    optional_default_value: Option<serde_yaml::Value>,
    #[serde(default)]
    ui_name: Option<String>,
    #[serde(default)]
    ui_hidden: bool,
    #[serde(default)]
    ui_link_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct MappingDocument {
    storage_type: String,
    types: BTreeMap<String, MappingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MappingEntry {
    default: Vec<String>,
    #[serde(default)]
    versions: BTreeMap<u32, Vec<String>>,
}

/// Parse one type document into a rule set per declared version.
///
/// Versions are numbered from 1 in document order.
pub fn parse_type_document(yaml: &str) -> Result<Vec<ObjectTypeParsingRules>, RulesError> {
    let doc: TypeDocument = serde_yaml::from_str(yaml)?;
    if doc.versions.is_empty() {
        return Err(RulesError::InvalidRule(format!(
            "type {} declares no versions",
            doc.global_object_type
        )));
    }

    let storage_type = StorageObjectType::new(doc.storage_type, doc.storage_object_type);
    doc.versions
        .into_iter()
        .enumerate()
        .map(|(i, version)| {
            let search_type = SearchObjectType::new(doc.global_object_type.clone(), i as u32 + 1)?;
            build_version(search_type, storage_type.clone(), doc.ui_type_name.as_deref(), version)
        })
        .collect()
}

fn build_version(
    search_type: SearchObjectType,
    storage_type: StorageObjectType,
    ui_type_name: Option<&str>,
    version: VersionDocument,
) -> Result<ObjectTypeParsingRules, RulesError> {
    let context = search_type.to_string();
    let mut builder = ObjectTypeParsingRules::builder(search_type, storage_type);
    if let Some(name) = ui_type_name {
        builder = builder.with_ui_type_name(name);
    }

    match (
        version.inner_sub_type,
        version.path_to_sub_objects,
        version.primary_key_path,
    ) {
        (None, None, None) => {}
        (Some(sub_type), Some(sub_path), Some(key_path)) => {
            builder = builder.with_sub_object(SubObjectSpec {
                sub_object_type: sub_type,
                sub_objects_path: ObjectJsonPath::new(&sub_path)?,
                primary_key_path: ObjectJsonPath::new(&key_path)?,
            });
        }
        _ => {
            return Err(RulesError::InvalidRule(format!(
                "{}: inner-sub-type, path-to-sub-objects and primary-key-path must be given together",
                context
            )));
        }
    }

    for rule in version.indexing_rules {
        builder = builder.with_indexing_rule(build_rule(rule).map_err(|e| {
            RulesError::InvalidRule(format!("{}: {}", context, e))
        })?);
    }
    builder.build()
}

fn build_rule(doc: RuleDocument) -> Result<IndexingRules, RulesError> {
    let path = doc.path.as_deref().map(ObjectJsonPath::new).transpose()?;
    let mut builder = IndexingRules::from_either(path, doc.source_key)?
        .with_from_parent(doc.from_parent)
        .with_full_text(doc.full_text)
        .with_not_indexed(doc.not_indexed)
        .with_ui_hidden(doc.ui_hidden);

    if let Some(key_name) = doc.key_name {
        builder = builder.with_key_name(key_name);
    }
    if let Some(keyword_type) = doc.keyword_type {
        builder = builder.with_keyword_type(keyword_type.parse::<KeywordType>()?);
    }
    if let Some(transform) = doc.transform {
        builder = builder.with_transform(transform.parse()?);
    }
    if let Some(default) = doc.optional_default_value {
        let value = serde_json::to_value(default)
            .map_err(|e| RulesError::InvalidRule(format!("bad default value: {}", e)))?;
        builder = builder.with_default_value(value);
    }
    if let Some(ui_name) = doc.ui_name {
        builder = builder.with_ui_name(ui_name);
    }
    if let Some(link) = doc.ui_link_key {
        builder = builder.with_ui_link_key(link);
    }
    builder.build()
}

/// Parse one mapping document.
pub fn parse_mapping_document(yaml: &str) -> Result<Vec<TypeMapping>, RulesError> {
    let doc: MappingDocument = serde_yaml::from_str(yaml)?;
    doc.types
        .into_iter()
        .map(|(storage_type, entry)| {
            let defaults = parse_refs(&entry.default)?;
            let mut mapping = TypeMapping::new(doc.storage_type.clone(), storage_type, defaults);
            for (version, refs) in entry.versions {
                mapping = mapping.with_version_override(version, parse_refs(&refs)?);
            }
            Ok(mapping)
        })
        .collect()
}

fn parse_refs(refs: &[String]) -> Result<Vec<SearchTypeRef>, RulesError> {
    refs.iter().map(|r| r.parse()).collect()
}

/// Load every type and mapping document under `dir`.
pub fn load_type_rules_dir(dir: &Path) -> Result<MemoryTypeStorage, RulesError> {
    if !dir.is_dir() {
        return Err(RulesError::Load(format!(
            "type rules directory {} does not exist",
            dir.display()
        )));
    }

    let mut type_files = Vec::new();
    let mut mapping_files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| RulesError::Load(e.to_string()))?;
        if !entry.file_type().is_file() || !is_yaml(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if relative.components().any(|c| c.as_os_str() == MAPPINGS_DIR) {
            mapping_files.push(entry.into_path());
        } else {
            type_files.push(entry.into_path());
        }
    }
    // deterministic error reporting
    type_files.sort();
    mapping_files.sort();

    let mut rules = Vec::new();
    for path in &type_files {
        debug!(path = %path.display(), "Loading type document");
        rules.extend(parse_type_document(&read(path)?).map_err(|e| with_path(path, e))?);
    }
    let mut mappings = Vec::new();
    for path in &mapping_files {
        debug!(path = %path.display(), "Loading mapping document");
        mappings.extend(parse_mapping_document(&read(path)?).map_err(|e| with_path(path, e))?);
    }

    let storage = MemoryTypeStorage::new(rules, mappings)?;
    info!(
        dir = %dir.display(),
        search_types = storage.search_type_count(),
        mappings = storage.mapping_count(),
        "Loaded type rules"
    );
    Ok(storage)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn read(path: &Path) -> Result<String, RulesError> {
    std::fs::read_to_string(path)
        .map_err(|e| RulesError::Load(format!("failed to read {}: {}", path.display(), e)))
}

fn with_path(path: &Path, err: RulesError) -> RulesError {
    RulesError::Load(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TypeStorage;
    use crate::transform::Transform;
    use serde_json::json;
    use tempfile::TempDir;

    const GENOME_YAML: &str = r#"
storage-type: WS
storage-object-type: KBaseGenomes.Genome
global-object-type: Genome
ui-type-name: Genome
versions:
  - indexing-rules:
      - path: scientific_name
        full-text: true
  - indexing-rules:
      - path: scientific_name
        full-text: true
      - path: assembly_ref
        key-name: assembly_guid
        transform: guid.Assembly
      - source-key: assembly_guid
        key-name: assembly_name
        transform: lookup.name
      - path: domain
        optional-default-value: Unknown
"#;

    const FEATURE_YAML: &str = r#"
storage-type: WS
storage-object-type: KBaseGenomes.Genome
global-object-type: GenomeFeature
versions:
  - inner-sub-type: feature
    path-to-sub-objects: features
    primary-key-path: id
    indexing-rules:
      - path: id
      - path: location
        key-name: contig_id
        transform: location.contig_id
      - path: scientific_name
        from-parent: true
"#;

    #[test]
    fn test_parse_type_document_versions() {
        let rules = parse_type_document(GENOME_YAML).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].global_object_type().to_string(), "Genome_1");
        assert_eq!(rules[1].global_object_type().to_string(), "Genome_2");

        let v2 = &rules[1];
        assert_eq!(v2.indexing_rules().len(), 4);
        assert_eq!(v2.indexing_rules()[1].key_name(), "assembly_guid");
        assert_eq!(
            v2.indexing_rules()[2].transform(),
            Some(&Transform::Lookup {
                target_key: "name".to_string()
            })
        );
        assert_eq!(v2.indexing_rules()[3].default_value(), Some(&json!("Unknown")));
    }

    #[test]
    fn test_parse_subobject_document() {
        let rules = parse_type_document(FEATURE_YAML).unwrap();
        let spec = rules[0].sub_object().unwrap();
        assert_eq!(spec.sub_object_type, "feature");
        assert!(rules[0].indexing_rules()[2].is_from_parent());
    }

    #[test]
    fn test_rejects_path_and_source_key() {
        let yaml = r#"
storage-type: WS
storage-object-type: T
global-object-type: Thing
versions:
  - indexing-rules:
      - path: a
        source-key: b
"#;
        assert!(matches!(parse_type_document(yaml), Err(RulesError::InvalidRule(_))));
    }

    #[test]
    fn test_rejects_unknown_transform() {
        let yaml = r#"
storage-type: WS
storage-object-type: T
global-object-type: Thing
versions:
  - indexing-rules:
      - path: a
        transform: explode
"#;
        assert!(parse_type_document(yaml).is_err());
    }

    #[test]
    fn test_parse_mapping_document() {
        let yaml = r#"
storage-type: WS
types:
  KBaseGenomes.Genome:
    default: [Genome, GenomeFeature]
    versions:
      3: [Genome_1]
"#;
        let mappings = parse_mapping_document(yaml).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].search_types(Some(3)), &[SearchTypeRef::versioned("Genome", 1)]);
        assert_eq!(mappings[0].search_types(Some(9)).len(), 2);
    }

    #[test]
    fn test_load_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("genome.yaml"), GENOME_YAML).unwrap();
        std::fs::write(dir.path().join("feature.yml"), FEATURE_YAML).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join(MAPPINGS_DIR)).unwrap();
        std::fs::write(
            dir.path().join(MAPPINGS_DIR).join("ws.yaml"),
            "storage-type: WS\ntypes:\n  KBaseGenomes.Genome:\n    default: [Genome]\n",
        )
        .unwrap();

        let storage = load_type_rules_dir(dir.path()).unwrap();
        assert_eq!(storage.search_type_count(), 2);
        assert_eq!(storage.mapping_count(), 1);

        let found = storage
            .list_object_type_parsing_rules_for(&StorageObjectType::versioned(
                "WS",
                "KBaseGenomes.Genome",
                1,
            ))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].global_object_type().to_string(), "Genome_2");
    }

    #[test]
    fn test_load_missing_dir() {
        assert!(load_type_rules_dir(Path::new("/definitely/not/here")).is_err());
    }
}

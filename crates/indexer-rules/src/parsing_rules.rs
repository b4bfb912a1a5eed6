//! Per search-type-version rule sets.

use std::collections::HashSet;

use indexer_types::{SearchObjectType, StorageObjectType};

use crate::error::RulesError;
use crate::indexing_rules::IndexingRules;
use crate::path::ObjectJsonPath;
use crate::transform::Transform;

/// Where a subobject rule set finds its subobjects inside the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubObjectSpec {
    /// Subobject type name, used in subobject GUIDs
    pub sub_object_type: String,
    /// Path to the array or map holding the subobjects
    pub sub_objects_path: ObjectJsonPath,
    /// Path, relative to each subobject, to its primary key
    pub primary_key_path: ObjectJsonPath,
}

/// Parsing rules for one version of a search type.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTypeParsingRules {
    global_object_type: SearchObjectType,
    ui_type_name: Option<String>,
    storage_object_type: StorageObjectType,
    sub_object: Option<SubObjectSpec>,
    indexing_rules: Vec<IndexingRules>,
}

impl ObjectTypeParsingRules {
    pub fn builder(
        global_object_type: SearchObjectType,
        storage_object_type: StorageObjectType,
    ) -> ObjectTypeParsingRulesBuilder {
        ObjectTypeParsingRulesBuilder {
            rules: ObjectTypeParsingRules {
                global_object_type,
                ui_type_name: None,
                storage_object_type,
                sub_object: None,
                indexing_rules: Vec::new(),
            },
        }
    }

    pub fn global_object_type(&self) -> &SearchObjectType {
        &self.global_object_type
    }

    /// UI display name, defaulting to the search type name.
    pub fn ui_type_name(&self) -> &str {
        self.ui_type_name
            .as_deref()
            .unwrap_or_else(|| self.global_object_type.type_name())
    }

    pub fn storage_object_type(&self) -> &StorageObjectType {
        &self.storage_object_type
    }

    pub fn sub_object(&self) -> Option<&SubObjectSpec> {
        self.sub_object.as_ref()
    }

    pub fn is_sub_object_rules(&self) -> bool {
        self.sub_object.is_some()
    }

    pub fn indexing_rules(&self) -> &[IndexingRules] {
        &self.indexing_rules
    }
}

#[derive(Debug, Clone)]
pub struct ObjectTypeParsingRulesBuilder {
    rules: ObjectTypeParsingRules,
}

impl ObjectTypeParsingRulesBuilder {
    pub fn with_ui_type_name(mut self, name: impl Into<String>) -> Self {
        self.rules.ui_type_name = Some(name.into());
        self
    }

    pub fn with_sub_object(mut self, spec: SubObjectSpec) -> Self {
        self.rules.sub_object = Some(spec);
        self
    }

    pub fn with_indexing_rule(mut self, rule: IndexingRules) -> Self {
        self.rules.indexing_rules.push(rule);
        self
    }

    pub fn build(self) -> Result<ObjectTypeParsingRules, RulesError> {
        let rules = self.rules;
        let type_name = rules.global_object_type.to_string();

        if let Some(spec) = &rules.sub_object {
            if spec.sub_object_type.trim().is_empty() {
                return Err(RulesError::InvalidRule(format!(
                    "{}: subobject type name is empty",
                    type_name
                )));
            }
        }

        check_rule_order(&rules, &type_name)?;
        Ok(rules)
    }
}

/// Each rule may only read keys produced by earlier rules. Subobject id keys
/// must come from plain path rules, which are extracted before references
/// are resolved.
fn check_rule_order(rules: &ObjectTypeParsingRules, type_name: &str) -> Result<(), RulesError> {
    let mut seen_keys = HashSet::new();
    let mut plain_path_keys = HashSet::new();
    for rule in &rules.indexing_rules {
        if rule.is_from_parent() && rules.sub_object.is_none() {
            return Err(RulesError::InvalidRule(format!(
                "{}: rule {} uses from-parent outside a subobject rule set",
                type_name,
                rule.key_name()
            )));
        }
        if let Some(source_key) = rule.source_key() {
            if !seen_keys.contains(source_key) {
                return Err(RulesError::InvalidRule(format!(
                    "{}: rule {} reads source key {} which no earlier rule produces",
                    type_name,
                    rule.key_name(),
                    source_key
                )));
            }
        }
        if let Some(Transform::Guid {
            subobject_id_key: Some(id_key),
            ..
        }) = rule.transform()
        {
            if !plain_path_keys.contains(id_key.as_str()) {
                return Err(RulesError::InvalidRule(format!(
                    "{}: rule {} derives subobject ids from key {} which no earlier path rule produces",
                    type_name,
                    rule.key_name(),
                    id_key
                )));
            }
        }
        if !rule.is_derived() && !rule.transform().is_some_and(Transform::needs_lookup) {
            plain_path_keys.insert(rule.key_name());
        }
        seen_keys.insert(rule.key_name());
    }
    Ok(())
}

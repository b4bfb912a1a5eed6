//! Keyword extraction: applies one rule set to one (sub)object.
//!
//! Rules run in phases so that every rule sees the keys it depends on:
//! 1. path rules with value-only transforms
//! 2. path rules with `guid` transforms (references resolved, targets indexed)
//! 3. source-key rules, in declaration order
//! 4. default values for keys that produced nothing
//! 5. coercion to each key's keyword type

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use indexer_rules::{IndexingRules, ObjectTypeParsingRules, Transform};
use indexer_types::{Guid, ObjectRefPath};

use crate::error::{IndexingError, UnprocessableReason};
use crate::lookup::ObjectLookupProvider;

/// A rule set with its fragments extracted, ready for keyword parsing.
#[derive(Debug)]
pub(crate) struct PreparedRuleSet {
    pub rules: Arc<ObjectTypeParsingRules>,
    /// Parent-level fragment, pruned of subobjects for subobject rule sets
    pub parent: Value,
    /// One entry per (sub)object to index
    pub objects: Vec<(Guid, Value)>,
}

/// Extract the parent fragment and every subobject for one rule set.
///
/// Fails when subobjects exceed `max_subobjects` or a primary key is not a
/// unique string or integer.
pub(crate) fn prepare_rule_set(
    rules: Arc<ObjectTypeParsingRules>,
    object: &Value,
    guid: &Guid,
    max_subobjects: usize,
) -> Result<PreparedRuleSet, IndexingError> {
    let Some(spec) = rules.sub_object() else {
        return Ok(PreparedRuleSet {
            parent: object.clone(),
            objects: vec![(guid.clone(), object.clone())],
            rules,
        });
    };

    // With a wildcard the path matches subobjects, otherwise their container.
    let matched = spec.sub_objects_path.extract(object);
    let sub_objects: Vec<&Value> = if spec.sub_objects_path.has_wildcard() {
        matched
    } else {
        matched
            .into_iter()
            .flat_map(|container| match container {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                Value::Object(map) => map.values().collect(),
                other => vec![other],
            })
            .collect()
    };

    if sub_objects.len() > max_subobjects {
        return Err(IndexingError::unprocessable(
            UnprocessableReason::SubobjectCount,
            format!(
                "{} has {} {} subobjects, more than the maximum of {}",
                guid,
                sub_objects.len(),
                spec.sub_object_type,
                max_subobjects
            ),
        ));
    }

    let mut seen = HashSet::new();
    let mut objects = Vec::with_capacity(sub_objects.len());
    for sub in sub_objects {
        let id = primary_key(sub, &rules, guid)?;
        if !seen.insert(id.clone()) {
            return Err(IndexingError::unprocessable(
                UnprocessableReason::SubobjectPrimaryKey,
                format!("{}: duplicate {} id {}", guid, spec.sub_object_type, id),
            ));
        }
        objects.push((guid.with_sub_object(&spec.sub_object_type, id), sub.clone()));
    }

    let mut parent = object.clone();
    spec.sub_objects_path.prune(&mut parent);

    debug!(
        guid = %guid,
        search_type = %rules.global_object_type(),
        subobjects = objects.len(),
        "Extracted subobjects"
    );
    Ok(PreparedRuleSet {
        rules,
        parent,
        objects,
    })
}

fn primary_key(
    sub: &Value,
    rules: &ObjectTypeParsingRules,
    guid: &Guid,
) -> Result<String, IndexingError> {
    let invalid = |why: String| {
        IndexingError::unprocessable(
            UnprocessableReason::SubobjectPrimaryKey,
            format!("{} ({}): {}", guid, rules.global_object_type(), why),
        )
    };
    let Some(spec) = rules.sub_object() else {
        return Err(invalid("not a subobject rule set".to_string()));
    };
    match spec.primary_key_path.extract(sub).first() {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Some(other) => Err(invalid(format!(
            "primary key at {} must be a string or integer, got {}",
            spec.primary_key_path, other
        ))),
        None => Err(invalid(format!(
            "no primary key at {}",
            spec.primary_key_path
        ))),
    }
}

/// Apply the rule set to one (sub)object.
///
/// `parent` is the fragment `from-parent` rules read; `ref_path` is the
/// traversal that led here and is the caller path for reference resolution.
pub(crate) async fn parse_keywords(
    rules: &ObjectTypeParsingRules,
    object: &Value,
    parent: &Value,
    ref_path: &ObjectRefPath,
    lookup: &mut ObjectLookupProvider<'_>,
) -> Result<BTreeMap<String, Vec<Value>>, IndexingError> {
    let mut keywords: BTreeMap<String, Vec<Value>> = BTreeMap::new();

    for rule in rules.indexing_rules() {
        let Some(path) = rule.path() else { continue };
        if rule.transform().is_some_and(Transform::needs_lookup) {
            continue;
        }
        let source = if rule.is_from_parent() { parent } else { object };
        let mut values: Vec<Value> = path.extract(source).into_iter().cloned().collect();
        if let Some(transform) = rule.transform() {
            values = transform.apply(values)?;
        }
        append(&mut keywords, rule, values);
    }

    for rule in rules.indexing_rules() {
        let Some(path) = rule.path() else { continue };
        let Some(Transform::Guid {
            target_type,
            subobject_id_key,
        }) = rule.transform()
        else {
            continue;
        };
        let source = if rule.is_from_parent() { parent } else { object };
        let refs = reference_texts(path.extract(source));
        let values = resolve_guids(
            target_type.as_deref(),
            subobject_id_key.as_deref(),
            refs,
            &keywords,
            ref_path,
            lookup,
        )
        .await?;
        append(&mut keywords, rule, values);
    }

    for rule in rules.indexing_rules() {
        let Some(source_key) = rule.source_key() else { continue };
        let input = keywords.get(source_key).cloned().unwrap_or_default();
        let values = match rule.transform() {
            Some(Transform::Lookup { target_key }) => {
                lookup_values(input, target_key, lookup).await?
            }
            Some(Transform::Guid {
                target_type,
                subobject_id_key,
            }) => {
                let refs = reference_texts(input.iter());
                resolve_guids(
                    target_type.as_deref(),
                    subobject_id_key.as_deref(),
                    refs,
                    &keywords,
                    ref_path,
                    lookup,
                )
                .await?
            }
            Some(transform) => transform.apply(input)?,
            None => input,
        };
        append(&mut keywords, rule, values);
    }

    for rule in rules.indexing_rules() {
        if let Some(default) = rule.default_value() {
            let values = keywords.entry(rule.key_name().to_string()).or_default();
            if values.is_empty() {
                values.push(default.clone());
            }
        }
    }

    let mut coerced = HashSet::new();
    for rule in rules.indexing_rules() {
        if !coerced.insert(rule.key_name()) {
            continue;
        }
        if let Some(values) = keywords.get_mut(rule.key_name()) {
            *values = values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| rule.keyword_type().coerce(v))
                .collect::<Result<_, _>>()?;
        }
    }

    keywords.retain(|_, values| !values.is_empty());
    Ok(keywords)
}

fn append(keywords: &mut BTreeMap<String, Vec<Value>>, rule: &IndexingRules, values: Vec<Value>) {
    keywords
        .entry(rule.key_name().to_string())
        .or_default()
        .extend(values);
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reference strings from extracted values; a list holds one reference per
/// element.
fn reference_texts<'v>(values: impl IntoIterator<Item = &'v Value>) -> Vec<String> {
    values
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().map(value_text).collect(),
            other => vec![value_text(other)],
        })
        .collect()
}

/// Resolve references to GUID strings, keeping only targets indexed under
/// `target_type`. With a subobject id key, each resolved object is combined
/// with every id found under that key.
async fn resolve_guids(
    target_type: Option<&str>,
    subobject_id_key: Option<&str>,
    refs: Vec<String>,
    keywords: &BTreeMap<String, Vec<Value>>,
    ref_path: &ObjectRefPath,
    lookup: &mut ObjectLookupProvider<'_>,
) -> Result<Vec<Value>, IndexingError> {
    if refs.is_empty() {
        return Ok(Vec::new());
    }
    let resolved = lookup.resolve_refs(ref_path, &refs).await?;

    let candidates: Vec<Guid> = match (subobject_id_key, target_type) {
        (Some(id_key), Some(target)) => {
            let descriptor = lookup.get_type_descriptor(target)?;
            let spec = descriptor.sub_object().ok_or_else(|| {
                IndexingError::unprocessable(
                    UnprocessableReason::TypeRules,
                    format!("{} has no subobjects to reference by {}", target, id_key),
                )
            })?;
            let ids: Vec<String> = keywords
                .get(id_key)
                .map(|values| values.iter().map(value_text).collect())
                .unwrap_or_default();
            resolved
                .iter()
                .flat_map(|guid| {
                    ids.iter()
                        .map(move |id| guid.with_sub_object(&spec.sub_object_type, id))
                })
                .collect()
        }
        _ => resolved,
    };

    let Some(target) = target_type else {
        return Ok(candidates.iter().map(|g| Value::String(g.to_string())).collect());
    };
    let types = lookup.get_types_for_guids(&candidates).await?;
    Ok(candidates
        .into_iter()
        .filter(|guid| {
            // Cycle back to an object not written yet; its type is unknown.
            if lookup.is_in_progress(&guid.parent()) {
                return true;
            }
            let matches = types
                .get(guid)
                .is_some_and(|found| found.iter().any(|t| t.type_name() == target));
            if !matches {
                warn!(
                    guid = %guid,
                    target_type = target,
                    "Dropping reference to object of another type"
                );
            }
            matches
        })
        .map(|g| Value::String(g.to_string()))
        .collect())
}

/// Values of `target_key` on the objects named by GUID-valued `input`.
async fn lookup_values(
    input: Vec<Value>,
    target_key: &str,
    lookup: &mut ObjectLookupProvider<'_>,
) -> Result<Vec<Value>, IndexingError> {
    let guids = input
        .iter()
        .map(|v| {
            value_text(v).parse::<Guid>().map_err(|e| {
                IndexingError::unprocessable(UnprocessableReason::Parse, e.to_string())
            })
        })
        .collect::<Result<Vec<Guid>, _>>()?;
    if guids.is_empty() {
        return Ok(Vec::new());
    }

    let objects = lookup.lookup_objects_by_guid(&guids).await?;
    Ok(guids
        .iter()
        .filter_map(|g| objects.get(g))
        .filter_map(|o| o.keyword(target_key))
        .flatten()
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_rules::{IndexingRules, ObjectJsonPath, SubObjectSpec};
    use indexer_types::{SearchObjectType, StorageObjectType};
    use serde_json::json;

    fn feature_rules(path: &str) -> Arc<ObjectTypeParsingRules> {
        Arc::new(
            ObjectTypeParsingRules::builder(
                SearchObjectType::new("GenomeFeature", 1).unwrap(),
                StorageObjectType::new("WS", "Genome"),
            )
            .with_sub_object(SubObjectSpec {
                sub_object_type: "feature".to_string(),
                sub_objects_path: ObjectJsonPath::new(path).unwrap(),
                primary_key_path: ObjectJsonPath::new("id").unwrap(),
            })
            .with_indexing_rule(
                IndexingRules::from_path(ObjectJsonPath::new("id").unwrap())
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap(),
        )
    }

    fn guid() -> Guid {
        "WS:1/2/3".parse().unwrap()
    }

    #[test]
    fn test_subobject_ids_come_from_primary_key() {
        let object = json!({
            "name": "g",
            "features": [{"id": "a", "len": 1}, {"id": "b", "len": 2}]
        });
        let prepared = prepare_rule_set(feature_rules("features"), &object, &guid(), 10).unwrap();

        let ids: Vec<Option<&str>> = prepared
            .objects
            .iter()
            .map(|(g, _)| g.sub_id.as_deref())
            .collect();
        assert_eq!(ids, vec![Some("a"), Some("b")]);
        assert_eq!(prepared.objects[0].0.to_string(), "WS:1/2/3:feature/a");
        assert_eq!(prepared.parent, json!({"name": "g"}));
    }

    #[test]
    fn test_wildcard_path_and_map_containers() {
        let object = json!({ "features": {"x": {"id": 7}, "y": {"id": 8}} });

        let via_container =
            prepare_rule_set(feature_rules("features"), &object, &guid(), 10).unwrap();
        let via_wildcard =
            prepare_rule_set(feature_rules("features/[*]"), &object, &guid(), 10).unwrap();

        let ids = |p: &PreparedRuleSet| -> Vec<String> {
            p.objects.iter().filter_map(|(g, _)| g.sub_id.clone()).collect()
        };
        assert_eq!(ids(&via_container), vec!["7", "8"]);
        assert_eq!(ids(&via_wildcard), vec!["7", "8"]);
        assert_eq!(via_wildcard.parent, json!({"features": {}}));
    }

    #[test]
    fn test_subobject_limit_boundary() {
        let object = json!({ "features": [{"id": "a"}, {"id": "b"}, {"id": "c"}] });

        assert!(prepare_rule_set(feature_rules("features"), &object, &guid(), 3).is_ok());
        let err = prepare_rule_set(feature_rules("features"), &object, &guid(), 2).unwrap_err();
        assert_eq!(err.reason(), Some(UnprocessableReason::SubobjectCount));
    }

    #[test]
    fn test_invalid_primary_keys() {
        for features in [
            json!([{"id": 1.5}]),
            json!([{"id": {"nested": true}}]),
            json!([{"name": "no id"}]),
            json!([{"id": "a"}, {"id": "a"}]),
        ] {
            let object = json!({ "features": features });
            let err =
                prepare_rule_set(feature_rules("features"), &object, &guid(), 10).unwrap_err();
            assert_eq!(err.reason(), Some(UnprocessableReason::SubobjectPrimaryKey));
        }
    }

    #[test]
    fn test_parent_rule_set_keeps_whole_object() {
        let rules = Arc::new(
            ObjectTypeParsingRules::builder(
                SearchObjectType::new("Genome", 1).unwrap(),
                StorageObjectType::new("WS", "Genome"),
            )
            .build()
            .unwrap(),
        );
        let object = json!({ "features": [{"id": "a"}] });
        let prepared = prepare_rule_set(rules, &object, &guid(), 0).unwrap();
        assert_eq!(prepared.objects, vec![(guid(), object.clone())]);
        assert_eq!(prepared.parent, object);
    }
}

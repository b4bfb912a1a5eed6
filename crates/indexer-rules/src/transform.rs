//! Value transforms applied by indexing rules.
//!
//! A transform is written as a dot-suffixed spec string: `values`, `string`,
//! `integer`, `location.<component>`, `guid.<SearchType>[.<subobject-id-key>]`
//! or `lookup.<key>`.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::RulesError;

/// Component extracted from a `[contig, start, strand, length]` location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationTransformType {
    ContigId,
    Start,
    Stop,
    Length,
    Strand,
}

impl LocationTransformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationTransformType::ContigId => "contig_id",
            LocationTransformType::Start => "start",
            LocationTransformType::Stop => "stop",
            LocationTransformType::Length => "length",
            LocationTransformType::Strand => "strand",
        }
    }
}

impl FromStr for LocationTransformType {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contig_id" => Ok(LocationTransformType::ContigId),
            "start" => Ok(LocationTransformType::Start),
            "stop" => Ok(LocationTransformType::Stop),
            "length" => Ok(LocationTransformType::Length),
            "strand" => Ok(LocationTransformType::Strand),
            other => Err(RulesError::UnknownTransform(format!("location.{}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Flatten arrays and maps into their elements
    Values,
    /// Render each value as a string
    String,
    /// Parse each value as an integer
    Integer,
    Location(LocationTransformType),
    /// Resolve references to GUIDs of the named search type
    Guid {
        target_type: Option<String>,
        subobject_id_key: Option<String>,
    },
    /// Fetch a keyword from the objects a GUID-valued key points to
    Lookup { target_key: String },
}

impl Transform {
    /// Whether the transform needs the lookup provider rather than only the value.
    pub fn needs_lookup(&self) -> bool {
        matches!(self, Transform::Guid { .. } | Transform::Lookup { .. })
    }

    /// Apply a value-only transform to extracted values.
    ///
    /// `Guid` and `Lookup` pass values through unchanged; the keyword parser
    /// resolves them against the search storage.
    pub fn apply(&self, values: Vec<Value>) -> Result<Vec<Value>, RulesError> {
        match self {
            Transform::Values => Ok(values.into_iter().flat_map(flatten).collect()),
            Transform::String => Ok(values
                .into_iter()
                .map(|v| match v {
                    Value::String(_) => v,
                    other => Value::String(other.to_string()),
                })
                .collect()),
            Transform::Integer => values
                .into_iter()
                .map(|v| {
                    let parsed = match &v {
                        Value::Number(n) => n.as_i64(),
                        Value::String(s) => s.trim().parse::<i64>().ok(),
                        _ => None,
                    };
                    parsed.map(Value::from).ok_or_else(|| {
                        RulesError::Conversion(format!("cannot convert {} to integer", v))
                    })
                })
                .collect(),
            Transform::Location(component) => {
                let mut out = Vec::new();
                for v in values {
                    for loc in locations(&v)? {
                        out.push(location_component(loc, *component)?);
                    }
                }
                Ok(out)
            }
            Transform::Guid { .. } | Transform::Lookup { .. } => Ok(values),
        }
    }
}

fn flatten(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        other => vec![other],
    }
}

/// A location value is either one `[contig, start, strand, length]` tuple or a
/// list of them.
fn locations(value: &Value) -> Result<Vec<&[Value]>, RulesError> {
    let items = value
        .as_array()
        .ok_or_else(|| RulesError::Location(format!("location is not an array: {}", value)))?;
    if items.iter().all(|i| i.is_array()) {
        items
            .iter()
            .filter_map(|i| i.as_array().map(|a| a.as_slice()))
            .map(Ok)
            .collect()
    } else {
        Ok(vec![items.as_slice()])
    }
}

fn location_component(
    loc: &[Value],
    component: LocationTransformType,
) -> Result<Value, RulesError> {
    let malformed = || {
        RulesError::Location(format!(
            "expected [contig, start, strand, length], got {:?}",
            loc
        ))
    };
    if loc.len() != 4 {
        return Err(malformed());
    }
    let contig = loc[0].as_str().ok_or_else(malformed)?;
    let start = loc[1].as_i64().ok_or_else(malformed)?;
    let strand = loc[2].as_str().ok_or_else(malformed)?;
    let length = loc[3].as_i64().ok_or_else(malformed)?;

    Ok(match component {
        LocationTransformType::ContigId => Value::from(contig),
        LocationTransformType::Start => Value::from(start),
        LocationTransformType::Strand => Value::from(strand),
        LocationTransformType::Length => Value::from(length),
        LocationTransformType::Stop => match strand {
            "+" => Value::from(start + length - 1),
            "-" => Value::from(start - length + 1),
            other => {
                return Err(RulesError::Location(format!("unknown strand: {}", other)));
            }
        },
    })
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Values => f.write_str("values"),
            Transform::String => f.write_str("string"),
            Transform::Integer => f.write_str("integer"),
            Transform::Location(c) => write!(f, "location.{}", c.as_str()),
            Transform::Guid {
                target_type,
                subobject_id_key,
            } => {
                f.write_str("guid")?;
                if let Some(t) = target_type {
                    write!(f, ".{}", t)?;
                }
                if let Some(k) = subobject_id_key {
                    write!(f, ".{}", k)?;
                }
                Ok(())
            }
            Transform::Lookup { target_key } => write!(f, "lookup.{}", target_key),
        }
    }
}

impl FromStr for Transform {
    type Err = RulesError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        let (name, prop) = match spec.split_once('.') {
            Some((n, p)) => (n, Some(p)),
            None => (spec, None),
        };
        match (name, prop) {
            ("values", None) => Ok(Transform::Values),
            ("string", None) => Ok(Transform::String),
            ("integer", None) => Ok(Transform::Integer),
            ("location", Some(component)) => Ok(Transform::Location(component.parse()?)),
            ("guid", None) => Ok(Transform::Guid {
                target_type: None,
                subobject_id_key: None,
            }),
            ("guid", Some(prop)) => {
                let (target, key) = match prop.split_once('.') {
                    Some((t, k)) => (t, Some(k.to_string())),
                    None => (prop, None),
                };
                Ok(Transform::Guid {
                    target_type: Some(target.to_string()),
                    subobject_id_key: key,
                })
            }
            ("lookup", Some(key)) if !key.is_empty() => Ok(Transform::Lookup {
                target_key: key.to_string(),
            }),
            _ => Err(RulesError::UnknownTransform(spec.to_string())),
        }
    }
}

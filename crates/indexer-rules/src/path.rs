//! Paths into JSON documents.
//!
//! A path is a `/`-separated list of segments. The segment `[*]` matches
//! every element of an array or every value of a map.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::RulesError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Key(String),
    Wildcard,
}

/// A parsed object path such as `features/[*]/location`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectJsonPath {
    segments: Vec<Segment>,
}

impl ObjectJsonPath {
    pub fn new(path: &str) -> Result<Self, RulesError> {
        let segments: Vec<Segment> = path
            .trim()
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "[*]" => Segment::Wildcard,
                key => Segment::Key(key.to_string()),
            })
            .collect();
        if segments.is_empty() {
            return Err(RulesError::InvalidRule(format!("empty object path: {:?}", path)));
        }
        Ok(Self { segments })
    }

    /// Last named segment, used as a default key name.
    pub fn last_key(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|s| match s {
            Segment::Key(k) => Some(k.as_str()),
            Segment::Wildcard => None,
        })
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.contains(&Segment::Wildcard)
    }

    /// Every value the path matches, in document order. Missing keys and
    /// nulls match nothing.
    pub fn extract<'v>(&self, value: &'v Value) -> Vec<&'v Value> {
        let mut current = vec![value];
        for segment in &self.segments {
            let mut next = Vec::new();
            for v in current {
                match (segment, v) {
                    (Segment::Key(k), Value::Object(map)) => {
                        if let Some(child) = map.get(k) {
                            next.push(child);
                        }
                    }
                    (Segment::Key(k), Value::Array(items)) => {
                        if let Some(child) = k.parse::<usize>().ok().and_then(|i| items.get(i)) {
                            next.push(child);
                        }
                    }
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    _ => {}
                }
            }
            current = next;
        }
        current.into_iter().filter(|v| !v.is_null()).collect()
    }

    /// Remove every value the path matches from `value`.
    pub fn prune(&self, value: &mut Value) {
        if let Some((last, parents)) = self.segments.split_last() {
            prune_at(value, parents, last);
        }
    }
}

fn prune_at(value: &mut Value, parents: &[Segment], last: &Segment) {
    match parents.split_first() {
        None => match (last, value) {
            (Segment::Key(k), Value::Object(map)) => {
                map.remove(k);
            }
            (Segment::Wildcard, Value::Object(map)) => map.clear(),
            (Segment::Wildcard, Value::Array(items)) => items.clear(),
            _ => {}
        },
        Some((segment, rest)) => match (segment, value) {
            (Segment::Key(k), Value::Object(map)) => {
                if let Some(child) = map.get_mut(k) {
                    prune_at(child, rest, last);
                }
            }
            (Segment::Wildcard, Value::Array(items)) => {
                for child in items.iter_mut() {
                    prune_at(child, rest, last);
                }
            }
            (Segment::Wildcard, Value::Object(map)) => {
                for child in map.values_mut() {
                    prune_at(child, rest, last);
                }
            }
            _ => {}
        },
    }
}

impl fmt::Display for ObjectJsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Key(k) => k.as_str(),
                Segment::Wildcard => "[*]",
            })
            .collect();
        write!(f, "/{}", parts.join("/"))
    }
}

impl FromStr for ObjectJsonPath {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "name": "g1",
            "features": [
                {"id": "a", "aliases": ["x", "y"]},
                {"id": "b", "aliases": []},
                {"id": null}
            ],
            "meta": {"k1": {"v": 1}, "k2": {"v": 2}}
        })
    }

    #[test]
    fn test_extract_simple_and_wildcard() {
        let d = doc();
        let name = ObjectJsonPath::new("name").unwrap();
        assert_eq!(name.extract(&d), vec![&json!("g1")]);

        let ids = ObjectJsonPath::new("/features/[*]/id").unwrap();
        assert_eq!(ids.extract(&d), vec![&json!("a"), &json!("b")]);

        let meta = ObjectJsonPath::new("meta/[*]/v").unwrap();
        assert_eq!(meta.extract(&d), vec![&json!(1), &json!(2)]);

        let missing = ObjectJsonPath::new("nope/x").unwrap();
        assert!(missing.extract(&d).is_empty());
    }

    #[test]
    fn test_array_index_segment() {
        let d = doc();
        let first = ObjectJsonPath::new("features/0/id").unwrap();
        assert_eq!(first.extract(&d), vec![&json!("a")]);
    }

    #[test]
    fn test_prune() {
        let mut d = doc();
        ObjectJsonPath::new("features").unwrap().prune(&mut d);
        assert!(d.get("features").is_none());
        assert_eq!(d["name"], json!("g1"));

        let mut d = doc();
        ObjectJsonPath::new("meta/[*]/v").unwrap().prune(&mut d);
        assert_eq!(d["meta"], json!({"k1": {}, "k2": {}}));
    }

    #[test]
    fn test_display_and_errors() {
        let p = ObjectJsonPath::new("a/[*]/b").unwrap();
        assert_eq!(p.to_string(), "/a/[*]/b");
        assert_eq!(p.last_key(), Some("b"));
        assert!(p.has_wildcard());
        assert!(ObjectJsonPath::new("/").is_err());
    }
}

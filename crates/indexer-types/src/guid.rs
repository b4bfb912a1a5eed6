//! Compound object identifiers and reference paths.
//!
//! Canonical GUID format: `{storage_code}:{access_group}/{object_id}[/{version}][:{sub_type}/{sub_id}]`
//!
//! A reference path is the chain of GUIDs traversed from a top-level object
//! down to a reference, joined with `;`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

/// Identifier of an object version or one of its subobjects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid {
    pub storage_code: String,
    pub access_group_id: i64,
    pub object_id: String,
    pub version: Option<u32>,
    pub sub_type: Option<String>,
    pub sub_id: Option<String>,
}

impl Guid {
    /// Create a parent-object GUID.
    pub fn new(
        storage_code: impl Into<String>,
        access_group_id: i64,
        object_id: impl Into<String>,
        version: Option<u32>,
    ) -> Self {
        Self {
            storage_code: storage_code.into(),
            access_group_id,
            object_id: object_id.into(),
            version,
            sub_type: None,
            sub_id: None,
        }
    }

    /// Derive a subobject GUID from this object's parent GUID.
    pub fn with_sub_object(&self, sub_type: impl Into<String>, sub_id: impl Into<String>) -> Self {
        Self {
            sub_type: Some(sub_type.into()),
            sub_id: Some(sub_id.into()),
            ..self.parent()
        }
    }

    /// The parent object GUID (subobject part dropped).
    pub fn parent(&self) -> Self {
        Self {
            sub_type: None,
            sub_id: None,
            ..self.clone()
        }
    }

    /// Whether this GUID addresses a subobject.
    pub fn is_sub_object(&self) -> bool {
        self.sub_type.is_some()
    }

    /// Key addressing every version of the object: `{code}:{ag}/{obj}`.
    pub fn object_key(&self) -> String {
        format!(
            "{}:{}/{}",
            self.storage_code, self.access_group_id, self.object_id
        )
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_key())?;
        if let Some(v) = self.version {
            write!(f, "/{}", v)?;
        }
        if let (Some(t), Some(id)) = (&self.sub_type, &self.sub_id) {
            write!(f, ":{}/{}", t, id)?;
        }
        Ok(())
    }
}

impl FromStr for Guid {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| TypesError::InvalidGuid(format!("{}: {}", s, why));

        let (storage_code, rest) = s.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        if storage_code.is_empty() {
            return Err(invalid("empty storage code"));
        }
        let (address, sub) = match rest.split_once(':') {
            Some((a, sub)) => (a, Some(sub)),
            None => (rest, None),
        };

        let parts: Vec<&str> = address.split('/').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid("expected access_group/object_id[/version]"));
        }
        let access_group_id: i64 = parts[0]
            .parse()
            .map_err(|_| invalid("access group id is not an integer"))?;
        if parts[1].is_empty() {
            return Err(invalid("empty object id"));
        }
        let version = match parts.get(2) {
            Some(v) => Some(v.parse().map_err(|_| invalid("version is not an integer"))?),
            None => None,
        };

        let mut guid = Guid::new(storage_code, access_group_id, parts[1], version);
        if let Some(sub) = sub {
            let (sub_type, sub_id) = sub
                .split_once('/')
                .ok_or_else(|| invalid("expected sub_type/sub_id"))?;
            if sub_type.is_empty() || sub_id.is_empty() {
                return Err(invalid("empty subobject part"));
            }
            guid = guid.with_sub_object(sub_type, sub_id);
        }
        Ok(guid)
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered chain of GUIDs from a top-level object to the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRefPath {
    path: Vec<Guid>,
}

impl ObjectRefPath {
    /// A path containing only the top-level object.
    pub fn root(guid: Guid) -> Self {
        Self { path: vec![guid] }
    }

    /// Build a path from an explicit chain; the chain must be non-empty.
    pub fn from_chain(path: Vec<Guid>) -> Result<Self, TypesError> {
        if path.is_empty() {
            return Err(TypesError::InvalidInput(
                "reference path cannot be empty".to_string(),
            ));
        }
        Ok(Self { path })
    }

    /// A new path extended by one hop.
    pub fn append(&self, guid: Guid) -> Self {
        let mut path = self.path.clone();
        path.push(guid);
        Self { path }
    }

    /// The object this path leads to.
    pub fn target(&self) -> &Guid {
        // non-empty by construction
        &self.path[self.path.len() - 1]
    }

    pub fn guids(&self) -> &[Guid] {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

impl fmt::Display for ObjectRefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.path.iter().map(|g| g.to_string()).collect();
        write!(f, "{}", joined.join(";"))
    }
}

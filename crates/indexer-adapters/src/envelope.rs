//! On-disk object format of the local directory backend.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use indexer_types::{SourceData, StorageObjectType};

use crate::error::AdapterError;
use crate::local::LOCAL_STORAGE_CODE;

/// One stored object version: `{root}/{access_group}/{object_id}/{version}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEnvelope {
    /// Storage type name
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_version: Option<u32>,
    pub name: String,
    pub creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copier: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// The object itself; this is what type rules are applied to
    pub data: Value,
    /// References this object may make. When present, other references
    /// made by the object do not resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ObjectEnvelope {
    pub async fn read(path: &Path) -> Result<Self, AdapterError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AdapterError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| AdapterError::parse(path, e.to_string()))
    }

    pub fn storage_type(&self) -> StorageObjectType {
        StorageObjectType {
            storage_code: LOCAL_STORAGE_CODE.to_string(),
            type_name: self.type_name.clone(),
            version: self.type_version,
        }
    }

    pub fn source_data(&self) -> SourceData {
        let mut source = SourceData::new(self.name.clone(), self.creator.clone())
            .with_source_tags(self.tags.clone());
        if let Some(copier) = &self.copier {
            source = source.with_copier(copier.clone());
        }
        source
    }

    pub fn allows_reference(&self, reference: &str) -> bool {
        self.refs
            .as_ref()
            .map_or(true, |refs| refs.iter().any(|r| r == reference))
    }
}

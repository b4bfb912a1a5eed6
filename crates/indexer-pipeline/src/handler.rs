//! Source data handlers: per-storage-code access to the backend holding the
//! original objects.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use indexer_types::{
    ChildStatusEvent, Guid, ObjectRefPath, SourceData, StorageObjectType, StoredStatusEvent,
};

use crate::error::{IndexingError, UnprocessableReason};

/// A reference resolved against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    /// The reference as it appeared in the referring object
    pub reference: String,
    pub guid: Guid,
    pub storage_type: StorageObjectType,
    pub timestamp: DateTime<Utc>,
}

/// Access to one storage backend.
#[async_trait]
pub trait SourceDataHandler: Send + Sync {
    /// The storage code this handler serves.
    fn storage_code(&self) -> &str;

    /// Whether the event stands for a batch of child events.
    fn is_expandable(&self, event: &StoredStatusEvent) -> bool;

    /// Child events of an expandable event. Finite and single-pass; elements
    /// may fail individually.
    fn expand<'a>(
        &'a self,
        event: &'a StoredStatusEvent,
    ) -> BoxStream<'a, Result<ChildStatusEvent, IndexingError>>;

    /// Write the raw object at the end of `ref_path` to `destination`.
    async fn load(
        &self,
        ref_path: &ObjectRefPath,
        destination: &Path,
    ) -> Result<SourceData, IndexingError>;

    /// Canonical path string for each reference made from `caller_path`.
    fn build_reference_paths(
        &self,
        caller_path: &ObjectRefPath,
        refs: &[String],
    ) -> Result<BTreeMap<String, String>, IndexingError>;

    async fn resolve_references(
        &self,
        caller_path: &ObjectRefPath,
        refs: &[String],
    ) -> Result<Vec<ResolvedReference>, IndexingError>;
}

/// Handlers keyed by storage code.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn SourceDataHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own storage code, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn SourceDataHandler>) {
        self.handlers
            .insert(handler.storage_code().to_string(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn SourceDataHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, storage_code: &str) -> Result<Arc<dyn SourceDataHandler>, IndexingError> {
        self.handlers.get(storage_code).cloned().ok_or_else(|| {
            IndexingError::unprocessable(
                UnprocessableReason::NoHandler,
                format!("no source data handler for storage code {}", storage_code),
            )
        })
    }

    pub fn storage_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("storage_codes", &self.storage_codes())
            .finish()
    }
}

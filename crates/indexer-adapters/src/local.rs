//! Source data handler over a local directory tree.
//!
//! Layout: `{root}/{access_group}/{object_id}/{version}.json`, each file an
//! [`ObjectEnvelope`]. References are written `{access_group}/{object_id}`
//! (newest version) or `{access_group}/{object_id}/{version}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};
use walkdir::WalkDir;

use indexer_pipeline::{IndexingError, ResolvedReference, SourceDataHandler};
use indexer_types::{
    ChildStatusEvent, Guid, ObjectRefPath, SourceData, StatusEvent, StatusEventType,
    StoredStatusEvent,
};

use crate::envelope::ObjectEnvelope;
use crate::error::AdapterError;

/// Storage code served by [`LocalDirectoryHandler`].
pub const LOCAL_STORAGE_CODE: &str = "FS";

/// What one child of a batch event stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChildPlan {
    /// A `NEW_VERSION` event for one stored version
    Version { object_id: String, version: u32 },
    /// An all-versions event for one object
    AllVersions {
        object_id: String,
        event_type: StatusEventType,
    },
}

#[derive(Debug, Clone)]
pub struct LocalDirectoryHandler {
    root: PathBuf,
}

impl LocalDirectoryHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_path(&self, access_group: i64, object_id: &str, version: u32) -> PathBuf {
        self.root
            .join(access_group.to_string())
            .join(object_id)
            .join(format!("{}.json", version))
    }

    /// Stored versions of an object, oldest first. A missing object has none.
    fn versions(&self, access_group: i64, object_id: &str) -> Result<Vec<u32>, AdapterError> {
        let dir = self.root.join(access_group.to_string()).join(object_id);
        let mut versions: Vec<u32> = list_dir(&dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| p.file_stem()?.to_str()?.parse().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Object ids of an access group, sorted.
    fn object_ids(&self, access_group: i64) -> Result<Vec<String>, AdapterError> {
        let dir = self.root.join(access_group.to_string());
        let mut ids: Vec<String> = list_dir(&dir)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn resolve_version(
        &self,
        access_group: i64,
        object_id: &str,
        version: Option<u32>,
    ) -> Result<Option<u32>, AdapterError> {
        match version {
            Some(v) => Ok(Some(v)),
            None => Ok(self.versions(access_group, object_id)?.last().copied()),
        }
    }

    async fn read_envelope(&self, guid: &Guid) -> Result<ObjectEnvelope, AdapterError> {
        let version = self
            .resolve_version(guid.access_group_id, &guid.object_id, guid.version)?
            .ok_or_else(|| AdapterError::NotFound(guid.to_string()))?;
        let path = self.version_path(guid.access_group_id, &guid.object_id, version);
        if !path.is_file() {
            return Err(AdapterError::NotFound(guid.to_string()));
        }
        ObjectEnvelope::read(&path).await
    }

    fn plan_children(&self, event: &StatusEvent) -> Result<Vec<ChildPlan>, AdapterError> {
        let access_group = event.access_group_id();
        let versions_of = |object_id: &str| -> Result<Vec<ChildPlan>, AdapterError> {
            Ok(self
                .versions(access_group, object_id)?
                .into_iter()
                .map(|version| ChildPlan::Version {
                    object_id: object_id.to_string(),
                    version,
                })
                .collect())
        };

        let all_versions = match event.event_type() {
            StatusEventType::NewAllVersions => {
                let object_id = event.object_id().ok_or_else(|| {
                    AdapterError::InvalidReference(format!("{} names no object", event))
                })?;
                return versions_of(object_id);
            }
            StatusEventType::CopyAccessGroup => {
                let mut plans = Vec::new();
                for object_id in self.object_ids(access_group)? {
                    plans.extend(versions_of(&object_id)?);
                }
                return Ok(plans);
            }
            StatusEventType::DeleteAccessGroup => StatusEventType::DeleteAllVersions,
            StatusEventType::PublishAccessGroup => StatusEventType::PublishAllVersions,
            StatusEventType::UnpublishAccessGroup => StatusEventType::UnpublishAllVersions,
            _ => return Ok(Vec::new()),
        };

        Ok(self
            .object_ids(access_group)?
            .into_iter()
            .map(|object_id| ChildPlan::AllVersions {
                object_id,
                event_type: all_versions,
            })
            .collect())
    }

    async fn child_event(
        &self,
        parent: &StoredStatusEvent,
        plan: ChildPlan,
    ) -> Result<ChildStatusEvent, IndexingError> {
        let access_group = parent.event.access_group_id();
        let event = match plan {
            ChildPlan::Version { object_id, version } => {
                let path = self.version_path(access_group, &object_id, version);
                let envelope = ObjectEnvelope::read(&path).await?;
                let builder = StatusEvent::builder(
                    LOCAL_STORAGE_CODE,
                    StatusEventType::NewVersion,
                    access_group,
                    envelope.timestamp,
                )
                .with_object_id(object_id)
                .with_version(version)
                .with_storage_object_type(envelope.storage_type())
                .with_overwrite_existing(parent.event.overwrite_existing());
                match parent.event.is_public() {
                    Some(is_public) => builder.with_is_public(is_public).build(),
                    None => builder.build(),
                }
            }
            ChildPlan::AllVersions {
                object_id,
                event_type,
            } => StatusEvent::builder(
                LOCAL_STORAGE_CODE,
                event_type,
                access_group,
                parent.event.timestamp(),
            )
            .with_object_id(object_id)
            .build(),
        };
        Ok(ChildStatusEvent::new(event, parent.id.clone()))
    }
}

#[async_trait]
impl SourceDataHandler for LocalDirectoryHandler {
    fn storage_code(&self) -> &str {
        LOCAL_STORAGE_CODE
    }

    fn is_expandable(&self, event: &StoredStatusEvent) -> bool {
        let event_type = event.event.event_type();
        event_type == StatusEventType::NewAllVersions || event_type.is_access_group_level()
    }

    fn expand<'a>(
        &'a self,
        event: &'a StoredStatusEvent,
    ) -> BoxStream<'a, Result<ChildStatusEvent, IndexingError>> {
        match self.plan_children(&event.event) {
            Ok(plans) => {
                debug!(event_id = %event.id, children = plans.len(), "Expanding event");
                stream::iter(plans)
                    .then(move |plan| self.child_event(event, plan))
                    .boxed()
            }
            Err(e) => stream::once(async move { Err(IndexingError::from(e)) }).boxed(),
        }
    }

    async fn load(
        &self,
        ref_path: &ObjectRefPath,
        destination: &Path,
    ) -> Result<SourceData, IndexingError> {
        let envelope = self.read_envelope(ref_path.target()).await?;
        let bytes = serde_json::to_vec(&envelope.data)?;
        tokio::fs::write(destination, bytes)
            .await
            .map_err(|e| AdapterError::io(destination, e))?;
        Ok(envelope.source_data())
    }

    fn build_reference_paths(
        &self,
        caller_path: &ObjectRefPath,
        refs: &[String],
    ) -> Result<BTreeMap<String, String>, IndexingError> {
        refs.iter()
            .map(|reference| {
                parse_reference(reference)?;
                Ok((reference.clone(), format!("{};{}", caller_path, reference)))
            })
            .collect()
    }

    async fn resolve_references(
        &self,
        caller_path: &ObjectRefPath,
        refs: &[String],
    ) -> Result<Vec<ResolvedReference>, IndexingError> {
        let caller = self.read_envelope(caller_path.target()).await?;
        let mut resolved = Vec::with_capacity(refs.len());
        for reference in refs {
            if !caller.allows_reference(reference) {
                warn!(
                    caller = %caller_path,
                    reference = %reference,
                    "Reference not declared by caller"
                );
                continue;
            }
            let (access_group, object_id, version) = parse_reference(reference)?;
            let Some(version) = self.resolve_version(access_group, &object_id, version)? else {
                debug!(reference = %reference, "Reference target missing");
                continue;
            };
            let guid = Guid::new(LOCAL_STORAGE_CODE, access_group, object_id, Some(version));
            let envelope = match self.read_envelope(&guid).await {
                Ok(envelope) => envelope,
                Err(AdapterError::NotFound(_)) => {
                    debug!(reference = %reference, "Reference target missing");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            resolved.push(ResolvedReference {
                reference: reference.clone(),
                guid,
                storage_type: envelope.storage_type(),
                timestamp: envelope.timestamp,
            });
        }
        Ok(resolved)
    }
}

/// `{access_group}/{object_id}[/{version}]`
fn parse_reference(reference: &str) -> Result<(i64, String, Option<u32>), AdapterError> {
    let invalid = || AdapterError::InvalidReference(reference.to_string());
    let parts: Vec<&str> = reference.split('/').collect();
    let (access_group, object_id, version) = match parts.as_slice() {
        [ag, obj] => (ag, obj, None),
        [ag, obj, ver] => (ag, obj, Some(ver.parse::<u32>().map_err(|_| invalid())?)),
        _ => return Err(invalid()),
    };
    let access_group: i64 = access_group.parse().map_err(|_| invalid())?;
    if object_id.is_empty() || object_id.contains(':') || version == Some(0) {
        return Err(invalid());
    }
    Ok((access_group, object_id.to_string(), version))
}

/// Direct children of `dir`; a missing directory has none.
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, AdapterError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .map(|entry| {
            entry.map(|e| e.into_path()).map_err(|e| {
                let message = e.to_string();
                AdapterError::io(
                    dir,
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, message)),
                )
            })
        })
        .collect()
}

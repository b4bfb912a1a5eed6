//! Status events and their processing lifecycle.
//!
//! A [`StatusEvent`] is an immutable fact about a change at a data source.
//! The event store wraps it in a [`StoredStatusEvent`] that carries the
//! mutable processing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;
use crate::guid::Guid;
use crate::object_type::StorageObjectType;

/// Worker code assigned to events and workers that name none.
pub const DEFAULT_WORKER_CODE: &str = "default";

/// Kind of change a status event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusEventType {
    /// A new version of an object was saved
    NewVersion,
    /// Every version of an object should be (re)indexed
    NewAllVersions,
    /// All versions of an object were deleted
    DeleteAllVersions,
    /// All versions of an object were restored
    UndeleteAllVersions,
    /// All versions of an object were renamed
    RenameAllVersions,
    /// All versions of an object became public
    PublishAllVersions,
    /// All versions of an object became private
    UnpublishAllVersions,
    /// An access group became public
    PublishAccessGroup,
    /// An access group became private
    UnpublishAccessGroup,
    /// An access group was deleted
    DeleteAccessGroup,
    /// An access group was cloned from another
    CopyAccessGroup,
}

impl StatusEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusEventType::NewVersion => "NEW_VERSION",
            StatusEventType::NewAllVersions => "NEW_ALL_VERSIONS",
            StatusEventType::DeleteAllVersions => "DELETE_ALL_VERSIONS",
            StatusEventType::UndeleteAllVersions => "UNDELETE_ALL_VERSIONS",
            StatusEventType::RenameAllVersions => "RENAME_ALL_VERSIONS",
            StatusEventType::PublishAllVersions => "PUBLISH_ALL_VERSIONS",
            StatusEventType::UnpublishAllVersions => "UNPUBLISH_ALL_VERSIONS",
            StatusEventType::PublishAccessGroup => "PUBLISH_ACCESS_GROUP",
            StatusEventType::UnpublishAccessGroup => "UNPUBLISH_ACCESS_GROUP",
            StatusEventType::DeleteAccessGroup => "DELETE_ACCESS_GROUP",
            StatusEventType::CopyAccessGroup => "COPY_ACCESS_GROUP",
        }
    }

    /// Whether the event addresses a whole access group rather than one object.
    pub fn is_access_group_level(&self) -> bool {
        matches!(
            self,
            StatusEventType::PublishAccessGroup
                | StatusEventType::UnpublishAccessGroup
                | StatusEventType::DeleteAccessGroup
                | StatusEventType::CopyAccessGroup
        )
    }
}

impl fmt::Display for StatusEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusEventType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            StatusEventType::NewVersion,
            StatusEventType::NewAllVersions,
            StatusEventType::DeleteAllVersions,
            StatusEventType::UndeleteAllVersions,
            StatusEventType::RenameAllVersions,
            StatusEventType::PublishAllVersions,
            StatusEventType::UnpublishAllVersions,
            StatusEventType::PublishAccessGroup,
            StatusEventType::UnpublishAccessGroup,
            StatusEventType::DeleteAccessGroup,
            StatusEventType::CopyAccessGroup,
        ];
        all.into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypesError::UnknownCode(s.to_string()))
    }
}

/// Processing state of a stored event.
///
/// Lifecycle: `UNPROC -> READY -> PROC -> {INDX | FAIL | UNINDX}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingState {
    /// Arrived, not yet promoted by the coordinator
    Unproc,
    /// Promoted, waiting for a worker
    Ready,
    /// Claimed by a worker
    Proc,
    /// Indexed successfully
    Indx,
    /// Processing failed
    Fail,
    /// Not indexable (no rules for the type)
    Unindx,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Unproc => "UNPROC",
            ProcessingState::Ready => "READY",
            ProcessingState::Proc => "PROC",
            ProcessingState::Indx => "INDX",
            ProcessingState::Fail => "FAIL",
            ProcessingState::Unindx => "UNINDX",
        }
    }

    /// Terminal states end an event's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::Indx | ProcessingState::Fail | ProcessingState::Unindx
        )
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPROC" => Ok(ProcessingState::Unproc),
            "READY" => Ok(ProcessingState::Ready),
            "PROC" => Ok(ProcessingState::Proc),
            "INDX" => Ok(ProcessingState::Indx),
            "FAIL" => Ok(ProcessingState::Fail),
            "UNINDX" => Ok(ProcessingState::Unindx),
            other => Err(TypesError::UnknownCode(other.to_string())),
        }
    }
}

/// Store-assigned key of an event record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// A fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable change notification from a data source.
///
/// Built with [`StatusEvent::builder`]; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    storage_code: String,
    event_type: StatusEventType,
    access_group_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_object_type: Option<StorageObjectType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_name: Option<String>,
    #[serde(default)]
    overwrite_existing: bool,
}

impl StatusEvent {
    /// Start building an event.
    pub fn builder(
        storage_code: impl Into<String>,
        event_type: StatusEventType,
        access_group_id: i64,
        timestamp: DateTime<Utc>,
    ) -> StatusEventBuilder {
        StatusEventBuilder {
            event: StatusEvent {
                storage_code: storage_code.into(),
                event_type,
                access_group_id,
                object_id: None,
                version: None,
                timestamp,
                storage_object_type: None,
                is_public: None,
                new_name: None,
                overwrite_existing: false,
            },
        }
    }

    pub fn storage_code(&self) -> &str {
        &self.storage_code
    }

    pub fn event_type(&self) -> StatusEventType {
        self.event_type
    }

    pub fn access_group_id(&self) -> i64 {
        self.access_group_id
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn storage_object_type(&self) -> Option<&StorageObjectType> {
        self.storage_object_type.as_ref()
    }

    pub fn is_public(&self) -> Option<bool> {
        self.is_public
    }

    pub fn new_name(&self) -> Option<&str> {
        self.new_name.as_deref()
    }

    pub fn overwrite_existing(&self) -> bool {
        self.overwrite_existing
    }

    /// The GUID of the object this event targets.
    ///
    /// Fails for access-group-level events, which name no object.
    pub fn to_guid(&self) -> Result<Guid, TypesError> {
        let object_id = self.object_id.as_ref().ok_or_else(|| {
            TypesError::InvalidInput(format!("{} event has no object id", self.event_type))
        })?;
        Ok(Guid::new(
            self.storage_code.clone(),
            self.access_group_id,
            object_id.clone(),
            self.version,
        ))
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}",
            self.event_type, self.storage_code, self.access_group_id
        )?;
        if let Some(obj) = &self.object_id {
            write!(f, "/{}", obj)?;
        }
        if let Some(v) = self.version {
            write!(f, "/{}", v)?;
        }
        Ok(())
    }
}

/// Builder for [`StatusEvent`].
#[derive(Debug, Clone)]
pub struct StatusEventBuilder {
    event: StatusEvent,
}

impl StatusEventBuilder {
    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.event.object_id = Some(object_id.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.event.version = Some(version);
        self
    }

    pub fn with_storage_object_type(mut self, storage_object_type: StorageObjectType) -> Self {
        self.event.storage_object_type = Some(storage_object_type);
        self
    }

    pub fn with_is_public(mut self, is_public: bool) -> Self {
        self.event.is_public = Some(is_public);
        self
    }

    pub fn with_new_name(mut self, new_name: impl Into<String>) -> Self {
        self.event.new_name = Some(new_name.into());
        self
    }

    pub fn with_overwrite_existing(mut self, overwrite: bool) -> Self {
        self.event.overwrite_existing = overwrite;
        self
    }

    pub fn build(self) -> StatusEvent {
        self.event
    }
}

/// An event plus the processing state owned by the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStatusEvent {
    pub id: EventId,
    pub event: StatusEvent,
    pub state: ProcessingState,
    /// Last state change time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    /// Identifier of whoever last changed the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updater: Option<String>,
    /// Partition label used to route the event to workers
    #[serde(default = "default_worker_code")]
    pub worker_code: String,
}

fn default_worker_code() -> String {
    DEFAULT_WORKER_CODE.to_string()
}

impl StoredStatusEvent {
    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// An event produced by expanding a batch event, tagged with its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildStatusEvent {
    pub event: StatusEvent,
    pub parent_id: EventId,
}

impl ChildStatusEvent {
    pub fn new(event: StatusEvent, parent_id: EventId) -> Self {
        Self { event, parent_id }
    }
}

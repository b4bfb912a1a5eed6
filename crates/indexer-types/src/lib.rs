//! # indexer-types
//!
//! Shared domain types for the event-driven search indexer.
//!
//! This crate defines the core data structures used throughout the system:
//! - Status events: immutable change notifications from a data source
//! - Processing states: the lifecycle of a stored event
//! - GUIDs and reference paths: compound object identifiers
//! - Object types: storage-side and search-side type names
//! - Source data and parsed objects: what a handler loads and what rules extract
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use indexer_types::{Guid, StatusEvent, StatusEventType};
//! use chrono::Utc;
//!
//! let event = StatusEvent::builder("WS", StatusEventType::NewVersion, 12, Utc::now())
//!     .with_object_id("3")
//!     .with_version(1)
//!     .build();
//! assert_eq!(event.to_guid().unwrap().to_string(), "WS:12/3/1");
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod guid;
pub mod object_type;
pub mod source;

pub use config::{CoordinatorSettings, RetrySettings, Settings, WorkerSettings};
pub use error::TypesError;
pub use event::{
    ChildStatusEvent, EventId, ProcessingState, StatusEvent, StatusEventBuilder,
    StatusEventType, StoredStatusEvent, DEFAULT_WORKER_CODE,
};
pub use guid::{Guid, ObjectRefPath};
pub use object_type::{SearchObjectType, StorageObjectType, MAX_SEARCH_TYPE_NAME_BYTES};
pub use source::{ParsedObject, SourceData};

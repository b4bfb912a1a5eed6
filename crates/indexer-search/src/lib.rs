//! # indexer-search
//!
//! Search storage for the event indexer, backed by an embedded Tantivy index.
//!
//! One document is written per (search type, object or subobject) pair. Each
//! document stores its full record as JSON and indexes:
//! - exact-match identity terms (GUID, parent GUID, all-versions object key)
//! - `key=value` keyword terms for every indexed keyword
//! - full text for keywords whose rules ask for it
//!
//! Query and ranking are out of scope; the [`SearchStorage`] trait covers the
//! presence checks, writes and flag updates the indexing pipeline needs.

pub mod document;
pub mod error;
pub mod index;
pub mod schema;
pub mod storage;

pub use document::{IndexedRecord, ObjectData, PostProcessing};
pub use error::SearchError;
pub use index::SearchIndexConfig;
pub use schema::{build_object_schema, SearchSchema};
pub use storage::{ObjectIndexingRequest, SearchStorage, TantivySearchStorage};

//! Event storage for the indexer.
//!
//! Provides the [`EventStorage`] contract the pipeline loops depend on and a
//! RocksDB-backed implementation with:
//! - Column family isolation between event records and the state index
//! - Time-ordered ULID event ids
//! - Atomic compare-and-swap state transitions via WriteBatch

pub mod column_families;
pub mod db;
pub mod error;
pub mod event_storage;
pub mod keys;

pub use db::{RocksEventStorage, StorageStats};
pub use error::StorageError;
pub use event_storage::EventStorage;
pub use keys::StateIndexKey;

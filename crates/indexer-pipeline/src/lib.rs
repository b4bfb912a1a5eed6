//! # indexer-pipeline
//!
//! The event-driven indexing pipeline.
//!
//! - [`IndexerCoordinator`]: promotes `UNPROC` events to `READY` under a
//!   bounded in-flight queue
//! - [`IndexerWorker`]: claims `READY` events, processes them and records a
//!   terminal state
//! - [`ObjectIndexer`]: loads an object, applies its type rules and follows
//!   references, indexing referenced objects on demand
//! - [`Retrier`]: retry policy over the [`IndexingError`] taxonomy
//!
//! Loops share nothing but the event store; all coordination goes through
//! its atomic state transitions.

pub mod coordinator;
pub mod error;
pub mod handle;
pub mod handler;
pub mod indexer;
pub mod lookup;
mod parse;
pub mod retrier;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use coordinator::{CoordinatorConfig, IndexerCoordinator};
pub use error::{ErrorKind, IndexingError, UnprocessableReason};
pub use handle::{CoordinatorHandle, LoopHandle, WorkerHandle};
pub use handler::{HandlerRegistry, ResolvedReference, SourceDataHandler};
pub use indexer::ObjectIndexer;
pub use lookup::ObjectLookupProvider;
pub use retrier::{log_retry, Retrier};
pub use worker::{IndexerWorker, WorkerConfig, WorkerServices};

//! # indexer-adapters
//!
//! Source data handlers for the event indexer.
//!
//! ## Core Components
//!
//! - [`LocalDirectoryHandler`]: Serves objects stored as JSON envelopes in a
//!   local directory tree under the [`LOCAL_STORAGE_CODE`] storage code
//! - [`ObjectEnvelope`]: On-disk format of one stored object version
//! - [`AdapterError`]: Error types for handler operations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use indexer_adapters::LocalDirectoryHandler;
//! use indexer_pipeline::HandlerRegistry;
//!
//! let handlers = HandlerRegistry::new()
//!     .with_handler(Arc::new(LocalDirectoryHandler::new("/data/objects")));
//! ```

pub mod envelope;
pub mod error;
pub mod local;

pub use envelope::ObjectEnvelope;
pub use error::AdapterError;
pub use local::{LocalDirectoryHandler, LOCAL_STORAGE_CODE};

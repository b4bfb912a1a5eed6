//! The event store contract used by the coordinator and workers.

use async_trait::async_trait;
use indexer_types::{EventId, ProcessingState, StatusEvent, StoredStatusEvent};

use crate::error::StorageError;

/// Durable store of status events and their processing state.
///
/// Every state transition is atomic: of any set of concurrent callers
/// attempting the same transition on the same event, at most one succeeds.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Insert a new event in the given state and assign it an id.
    async fn store(
        &self,
        event: StatusEvent,
        worker_code: &str,
        state: ProcessingState,
    ) -> Result<StoredStatusEvent, StorageError>;

    /// Up to `limit` events in `state`, oldest first.
    async fn get_by_state(
        &self,
        state: ProcessingState,
        limit: usize,
    ) -> Result<Vec<StoredStatusEvent>, StorageError>;

    async fn get(&self, id: &EventId) -> Result<Option<StoredStatusEvent>, StorageError>;

    /// Move the oldest event in `from` whose worker code is in `worker_codes`
    /// to `to`, recording `claimant`. Returns the updated record, or `None`
    /// when no event matched.
    ///
    /// An empty `worker_codes` slice means the default code only.
    async fn set_and_get_processing_state(
        &self,
        from: ProcessingState,
        worker_codes: &[String],
        to: ProcessingState,
        claimant: &str,
    ) -> Result<Option<StoredStatusEvent>, StorageError>;

    /// Move event `id` to `to` if it is currently in `expected_from`.
    ///
    /// `None` for `expected_from` forces the transition unconditionally.
    /// Returns whether the transition happened.
    async fn set_processing_state(
        &self,
        id: &EventId,
        expected_from: Option<ProcessingState>,
        to: ProcessingState,
        updater: Option<&str>,
    ) -> Result<bool, StorageError>;
}

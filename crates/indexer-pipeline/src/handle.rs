//! Handles to running coordinator and worker loops.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::IndexingError;

/// A spawned loop. Dropping the handle does not stop the loop.
#[derive(Debug)]
pub struct LoopHandle {
    name: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<(), IndexingError>>,
}

pub type WorkerHandle = LoopHandle;
pub type CoordinatorHandle = LoopHandle;

impl LoopHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        cancel: CancellationToken,
        join: JoinHandle<Result<(), IndexingError>>,
    ) -> Self {
        Self {
            name: name.into(),
            cancel,
            join,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to stop after the current cycle.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit. `Ok` means a graceful stop; an error is the
    /// failure that shut the loop down.
    pub async fn join(self) -> Result<(), IndexingError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(IndexingError::Fatal(format!(
                "{} task panicked or was aborted: {}",
                self.name, e
            ))),
        }
    }
}

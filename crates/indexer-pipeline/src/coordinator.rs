//! Indexer coordinator loop.
//!
//! Promotes `UNPROC` events to `READY` while keeping at most
//! `queue_capacity` promoted events outstanding. An event stays counted
//! against the capacity until a worker moves it to a terminal state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use indexer_storage::EventStorage;
use indexer_types::{CoordinatorSettings, EventId, ProcessingState, RetrySettings};

use crate::error::IndexingError;
use crate::handle::{CoordinatorHandle, LoopHandle};
use crate::retrier::Retrier;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub queue_capacity: usize,
    pub period: Duration,
    pub retry: RetrySettings,
}

impl CoordinatorConfig {
    pub fn new(queue_capacity: usize, period: Duration) -> Self {
        Self {
            queue_capacity,
            period,
            retry: RetrySettings::default(),
        }
    }

    pub fn from_settings(settings: &CoordinatorSettings, retry: &RetrySettings) -> Self {
        Self::new(settings.queue_capacity, settings.period()).with_retry(retry.clone())
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }
}

pub struct IndexerCoordinator {
    config: CoordinatorConfig,
    events: Arc<dyn EventStorage>,
    retrier: Retrier,
    cancel: CancellationToken,
    /// Events promoted by this coordinator and not yet seen terminal
    in_flight: HashSet<EventId>,
}

impl IndexerCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        events: Arc<dyn EventStorage>,
        cancel: CancellationToken,
    ) -> Self {
        let retrier = Retrier::new(config.retry.clone(), cancel.clone());
        Self {
            config,
            events,
            retrier,
            cancel,
            in_flight: HashSet::new(),
        }
    }

    /// Create the coordinator and spawn its loop.
    pub fn start(
        config: CoordinatorConfig,
        events: Arc<dyn EventStorage>,
        cancel: CancellationToken,
    ) -> CoordinatorHandle {
        let coordinator = Self::new(config, events, cancel.clone());
        let join = tokio::spawn(coordinator.run());
        LoopHandle::new("coordinator", cancel, join)
    }

    /// Number of promoted events not yet seen in a terminal state.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn run(mut self) -> Result<(), IndexingError> {
        info!(
            queue_capacity = self.config.queue_capacity,
            period_ms = self.config.period.as_millis() as u64,
            "Coordinator started"
        );

        let result = loop {
            match self.run_cycle().await {
                Ok(_) => {}
                Err(IndexingError::Interrupted) => break Ok(()),
                Err(e) => {
                    error!(error = %e, "Coordinator stopping on fatal error");
                    break Err(e);
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.config.period) => {}
            }
        };

        info!("Coordinator stopped");
        result
    }

    /// One tick: reconcile, then promote until the queue is full or no
    /// `UNPROC` events remain. Returns the number of events promoted.
    ///
    /// Errors returned here stop the loop.
    pub async fn run_cycle(&mut self) -> Result<usize, IndexingError> {
        self.reconcile().await?;

        let mut promoted = 0;
        while self.in_flight.len() < self.config.queue_capacity {
            let capacity = self.config.queue_capacity - self.in_flight.len();
            let batch = self
                .retrier
                .retry(None, || async {
                    self.events
                        .get_by_state(ProcessingState::Unproc, capacity)
                        .await
                        .map_err(IndexingError::from)
                })
                .await
                .or_else(skip_retriable(Vec::new()))?;
            if batch.is_empty() {
                break;
            }

            let mut promoted_in_batch = 0;
            for event in batch {
                let events = &self.events;
                let moved = self
                    .retrier
                    .retry(Some(&event), || async {
                        events
                            .set_processing_state(
                                &event.id,
                                Some(ProcessingState::Unproc),
                                ProcessingState::Ready,
                                None,
                            )
                            .await
                            .map_err(IndexingError::from)
                    })
                    .await
                    .or_else(skip_retriable(false))?;
                if moved {
                    debug!(event_id = %event.id, event = %event.event, "Promoted event");
                    self.in_flight.insert(event.id);
                    promoted_in_batch += 1;
                }
            }

            promoted += promoted_in_batch;
            // Every event of the batch was skipped or taken by someone else.
            if promoted_in_batch == 0 {
                break;
            }
        }

        if promoted > 0 {
            info!(promoted, in_flight = self.in_flight.len(), "Promoted events");
        }
        Ok(promoted)
    }

    /// Release capacity held by events that reached a terminal state.
    async fn reconcile(&mut self) -> Result<(), IndexingError> {
        let mut done = Vec::new();
        for id in &self.in_flight {
            let stored = self
                .retrier
                .retry(None, || async {
                    self.events.get(id).await.map_err(IndexingError::from)
                })
                .await;
            match stored {
                Ok(Some(event)) if !event.state.is_terminal() => {}
                Ok(_) => done.push(id.clone()),
                Err(e) if e.kind().stops_loop() => return Err(e),
                Err(e) => warn!(event_id = %id, error = %e, "Cannot check event state"),
            }
        }
        for id in &done {
            self.in_flight.remove(id);
        }
        if !done.is_empty() {
            debug!(released = done.len(), in_flight = self.in_flight.len(), "Reconciled queue");
        }
        Ok(())
    }
}

/// Log and swallow an exhausted retriable failure, yielding `fallback`.
fn skip_retriable<T: Clone>(fallback: T) -> impl Fn(IndexingError) -> Result<T, IndexingError> {
    move |e| {
        if e.kind().stops_loop() {
            Err(e)
        } else {
            warn!(error = %e, "Skipping after failed retries");
            Ok(fallback.clone())
        }
    }
}

//! Retry wrapper driven by the failure taxonomy.
//!
//! - Retriable failures are retried `count` times with a fixed delay.
//! - Fatal-retriable failures are retried `fatal_count` times with
//!   exponential backoff (no jitter), doubling up to `fatal_max_backoff`.
//! - Anything else is returned immediately.
//!
//! On exhaustion the last failure is returned unchanged. Sleeps end early
//! with [`IndexingError::Interrupted`] when the cancellation token fires.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use indexer_types::{RetrySettings, StoredStatusEvent};

use crate::error::{ErrorKind, IndexingError};

#[derive(Debug, Clone)]
pub struct Retrier {
    settings: RetrySettings,
    cancel: CancellationToken,
}

impl Retrier {
    pub fn new(settings: RetrySettings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `op` until it succeeds or its failure may no longer be retried.
    ///
    /// `log` is called before every retry with the retry number (from 1),
    /// the event the work concerns and the failure.
    pub async fn retry_with<T, F, Fut, L>(
        &self,
        event: Option<&StoredStatusEvent>,
        mut op: F,
        mut log: L,
    ) -> Result<T, IndexingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexingError>>,
        L: FnMut(u32, Option<&StoredStatusEvent>, &IndexingError),
    {
        let mut retries = 0u32;
        let mut fatal_retries = 0u32;
        let mut fatal_backoff = self.fatal_backoff();

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = match err.kind() {
                ErrorKind::Retriable if retries < self.settings.count => {
                    retries += 1;
                    self.settings.delay()
                }
                ErrorKind::FatalRetriable if fatal_retries < self.settings.fatal_count => {
                    fatal_retries += 1;
                    fatal_backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.settings.fatal_max_backoff())
                }
                _ => return Err(err),
            };

            log(retries + fatal_retries, event, &err);
            self.sleep(delay).await?;
        }
    }

    /// [`retry_with`](Self::retry_with) using [`log_retry`] as the callback.
    pub async fn retry<T, F, Fut>(
        &self,
        event: Option<&StoredStatusEvent>,
        op: F,
    ) -> Result<T, IndexingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexingError>>,
    {
        self.retry_with(event, op, log_retry).await
    }

    fn fatal_backoff(&self) -> ExponentialBackoff {
        let initial = self.settings.fatal_initial_backoff();
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.settings.fatal_max_backoff(),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), IndexingError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(IndexingError::Interrupted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Default retry callback: one warning per retry.
pub fn log_retry(attempt: u32, event: Option<&StoredStatusEvent>, err: &IndexingError) {
    match event {
        Some(stored) => warn!(
            attempt,
            event_id = %stored.id,
            event = %stored.event,
            error = %err,
            "Retrying after failure"
        ),
        None => warn!(attempt, error = %err, "Retrying after failure"),
    }
}

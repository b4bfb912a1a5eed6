//! Indexer worker loop.
//!
//! Each cycle claims at most one `READY` event for the worker's codes, moves
//! it to `PROC`, processes it and writes its terminal state. A cycle that
//! processed an event is followed immediately by the next one; otherwise the
//! worker idles for its period.

use std::path::PathBuf;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use indexer_rules::TypeStorage;
use indexer_search::SearchStorage;
use indexer_storage::EventStorage;
use indexer_types::{
    Guid, ProcessingState, RetrySettings, Settings, StatusEvent, StatusEventType,
    StoredStatusEvent, DEFAULT_WORKER_CODE,
};

use crate::error::{ErrorKind, IndexingError, UnprocessableReason};
use crate::handle::{LoopHandle, WorkerHandle};
use crate::handler::{HandlerRegistry, SourceDataHandler};
use crate::indexer::ObjectIndexer;
use crate::retrier::Retrier;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Recorded as the claimant of every event this worker processes
    pub worker_id: String,
    /// Worker codes this worker claims events for
    pub codes: Vec<String>,
    /// Idle time after a cycle that found nothing to do
    pub period: Duration,
    /// Directory under which the worker's private temp directory is created
    pub temp_root: PathBuf,
    pub retry: RetrySettings,
    pub max_subobjects: usize,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            codes: vec![DEFAULT_WORKER_CODE.to_string()],
            period: Duration::from_millis(1000),
            temp_root: std::env::temp_dir(),
            retry: RetrySettings::default(),
            max_subobjects: 10_000,
        }
    }

    /// Worker configuration from loaded settings.
    pub fn from_settings(worker_id: impl Into<String>, settings: &Settings) -> Self {
        Self::new(worker_id)
            .with_codes(settings.worker.effective_codes())
            .with_period(settings.worker.period())
            .with_temp_root(settings.expanded_temp_dir())
            .with_retry(settings.retry.clone())
            .with_max_subobjects(settings.max_subobjects)
    }

    pub fn with_codes(mut self, codes: Vec<String>) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_subobjects(mut self, max_subobjects: usize) -> Self {
        self.max_subobjects = max_subobjects;
        self
    }
}

/// Shared backends a worker talks to.
#[derive(Clone)]
pub struct WorkerServices {
    pub events: Arc<dyn EventStorage>,
    pub handlers: HandlerRegistry,
    pub type_storage: Arc<dyn TypeStorage>,
    pub search: Arc<dyn SearchStorage>,
}

/// What processing a single event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Indexed,
    /// No rules apply to the event's storage type
    Unsupported,
}

pub struct IndexerWorker {
    config: WorkerConfig,
    events: Arc<dyn EventStorage>,
    indexer: ObjectIndexer,
    retrier: Retrier,
    cancel: CancellationToken,
    temp_dir: TempDir,
}

impl IndexerWorker {
    /// Create the worker and its private temp directory.
    pub fn new(
        config: WorkerConfig,
        services: WorkerServices,
        cancel: CancellationToken,
    ) -> Result<Self, IndexingError> {
        std::fs::create_dir_all(&config.temp_root).map_err(|e| {
            IndexingError::Fatal(format!(
                "cannot create temp root {}: {}",
                config.temp_root.display(),
                e
            ))
        })?;
        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", config.worker_id))
            .tempdir_in(&config.temp_root)
            .map_err(|e| {
                IndexingError::Fatal(format!(
                    "cannot create worker temp dir in {}: {}",
                    config.temp_root.display(),
                    e
                ))
            })?;

        let retrier = Retrier::new(config.retry.clone(), cancel.clone());
        let indexer = ObjectIndexer::new(
            services.handlers,
            services.type_storage,
            services.search,
            retrier.clone(),
            temp_dir.path(),
            config.max_subobjects,
        );

        Ok(Self {
            config,
            events: services.events,
            indexer,
            retrier,
            cancel,
            temp_dir,
        })
    }

    /// Create the worker and spawn its loop.
    pub fn start(
        config: WorkerConfig,
        services: WorkerServices,
        cancel: CancellationToken,
    ) -> Result<WorkerHandle, IndexingError> {
        let worker = Self::new(config, services, cancel.clone())?;
        let name = format!("worker {}", worker.config.worker_id);
        let join = tokio::spawn(worker.run());
        Ok(LoopHandle::new(name, cancel, join))
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn temp_dir(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    async fn run(self) -> Result<(), IndexingError> {
        info!(
            worker_id = %self.config.worker_id,
            codes = ?self.config.codes,
            temp_dir = %self.temp_dir.path().display(),
            "Worker started"
        );

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }
            match self.run_cycle().await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(self.config.period) => {}
                    }
                }
                Err(IndexingError::Interrupted) => break Ok(()),
                Err(e) => {
                    error!(
                        worker_id = %self.config.worker_id,
                        error = %e,
                        "Worker stopping on fatal error"
                    );
                    break Err(e);
                }
            }
        };

        let worker_id = self.config.worker_id.clone();
        if let Err(e) = self.temp_dir.close() {
            warn!(worker_id = %worker_id, error = %e, "Failed to remove worker temp dir");
        }
        info!(worker_id = %worker_id, "Worker stopped");
        result
    }

    /// Claim and process at most one event. Returns whether an event was
    /// processed.
    ///
    /// Errors returned here stop the loop.
    pub async fn run_cycle(&self) -> Result<bool, IndexingError> {
        let claimed = self
            .retrier
            .retry(None, || async {
                self.events
                    .set_and_get_processing_state(
                        ProcessingState::Ready,
                        &self.config.codes,
                        ProcessingState::Proc,
                        &self.config.worker_id,
                    )
                    .await
                    .map_err(IndexingError::from)
            })
            .await;

        let event = match claimed {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::Retriable => {
                warn!(worker_id = %self.config.worker_id, error = %e, "Claim failed, idling");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        debug!(
            worker_id = %self.config.worker_id,
            event_id = %event.id,
            event = %event.event,
            "Claimed event"
        );

        let state = match self.process_event(&event).await {
            Ok(state) => state,
            Err(e) if e.kind().stops_loop() => {
                self.force_fail(&event).await;
                return Err(e);
            }
            Err(e) => {
                error!(
                    worker_id = %self.config.worker_id,
                    event_id = %event.id,
                    event = %event.event,
                    error = %e,
                    "Event failed"
                );
                ProcessingState::Fail
            }
        };

        self.finish(&event, state).await?;
        Ok(true)
    }

    async fn process_event(
        &self,
        stored: &StoredStatusEvent,
    ) -> Result<ProcessingState, IndexingError> {
        let handler = self.indexer.handlers().get(stored.event.storage_code())?;
        if handler.is_expandable(stored) {
            return self.process_expandable(stored, handler.as_ref()).await;
        }
        Ok(match self.process_direct(&stored.event, stored).await? {
            Outcome::Indexed => ProcessingState::Indx,
            Outcome::Unsupported => ProcessingState::Unindx,
        })
    }

    /// Process every child of a batch event in order. Any failed child fails
    /// the batch; unsupported children are skipped.
    async fn process_expandable(
        &self,
        stored: &StoredStatusEvent,
        handler: &dyn SourceDataHandler,
    ) -> Result<ProcessingState, IndexingError> {
        let mut children = handler.expand(stored);
        let (mut indexed, mut skipped, mut failed) = (0usize, 0usize, 0usize);

        while let Some(child) = children.next().await {
            let result = match child {
                Ok(child) => self.process_direct(&child.event, stored).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(Outcome::Indexed) => indexed += 1,
                Ok(Outcome::Unsupported) => skipped += 1,
                Err(e) if e.kind().stops_loop() => return Err(e),
                Err(e) => {
                    failed += 1;
                    warn!(event_id = %stored.id, error = %e, "Child event failed");
                }
            }
        }

        info!(
            event_id = %stored.id,
            event = %stored.event,
            indexed,
            skipped,
            failed,
            "Processed expanded event"
        );
        Ok(if failed > 0 {
            ProcessingState::Fail
        } else {
            ProcessingState::Indx
        })
    }

    async fn process_direct(
        &self,
        event: &StatusEvent,
        stored: &StoredStatusEvent,
    ) -> Result<Outcome, IndexingError> {
        let event_type = event.event_type();
        if event_type.is_access_group_level() || event_type == StatusEventType::NewAllVersions {
            return Err(IndexingError::unprocessable(
                UnprocessableReason::UnsupportedEvent,
                format!("{} events must be expanded before processing", event_type),
            ));
        }

        if let Some(storage_type) = event.storage_object_type() {
            let supported = self
                .retrier
                .retry(Some(stored), || async { self.indexer.is_supported(storage_type) })
                .await?;
            if !supported {
                info!(event = %event, storage_type = %storage_type, "Storage type not indexed");
                return Ok(Outcome::Unsupported);
            }
        }

        let guid = event.to_guid()?;
        let search = self.indexer.search();
        match event_type {
            StatusEventType::NewVersion => self.index_new_version(event, &guid, stored).await?,
            StatusEventType::DeleteAllVersions => {
                let changed = self
                    .retrier
                    .retry(Some(stored), || async {
                        search.delete_all_versions(&guid).await.map_err(IndexingError::from)
                    })
                    .await?;
                debug!(guid = %guid, changed, "Deleted all versions");
            }
            StatusEventType::UndeleteAllVersions => {
                let changed = self
                    .retrier
                    .retry(Some(stored), || async {
                        search.undelete_all_versions(&guid).await.map_err(IndexingError::from)
                    })
                    .await?;
                debug!(guid = %guid, changed, "Undeleted all versions");
            }
            StatusEventType::PublishAllVersions => {
                self.retrier
                    .retry(Some(stored), || async {
                        search.publish_all_versions(&guid).await.map_err(IndexingError::from)
                    })
                    .await?;
            }
            StatusEventType::UnpublishAllVersions => {
                self.retrier
                    .retry(Some(stored), || async {
                        search.unpublish_all_versions(&guid).await.map_err(IndexingError::from)
                    })
                    .await?;
            }
            StatusEventType::RenameAllVersions => {
                let new_name = event.new_name().ok_or_else(|| {
                    IndexingError::unprocessable(
                        UnprocessableReason::UnsupportedEvent,
                        format!("{} carries no new name", event),
                    )
                })?;
                self.retrier
                    .retry(Some(stored), || async {
                        search
                            .set_name_on_all_object_versions(&guid, new_name)
                            .await
                            .map_err(IndexingError::from)
                    })
                    .await?;
            }
            other => {
                return Err(IndexingError::unprocessable(
                    UnprocessableReason::UnsupportedEvent,
                    format!("cannot process {} events", other),
                ))
            }
        }
        Ok(Outcome::Indexed)
    }

    /// Index a new object version, or only propagate its public flag when the
    /// version is already indexed.
    async fn index_new_version(
        &self,
        event: &StatusEvent,
        guid: &Guid,
        stored: &StoredStatusEvent,
    ) -> Result<(), IndexingError> {
        let storage_type = event.storage_object_type().ok_or_else(|| {
            IndexingError::unprocessable(
                UnprocessableReason::UnsupportedEvent,
                format!("{} carries no storage object type", event),
            )
        })?;
        if guid.version.is_none() {
            return Err(IndexingError::unprocessable(
                UnprocessableReason::UnsupportedEvent,
                format!("{} carries no version", event),
            ));
        }
        let search = self.indexer.search();
        let guids = slice::from_ref(guid);

        if !event.overwrite_existing() {
            let present = self
                .retrier
                .retry(Some(stored), || async {
                    search
                        .check_parent_guids_exist(guids)
                        .await
                        .map_err(IndexingError::from)
                })
                .await?;
            if present.get(guid).copied().unwrap_or(false) {
                match event.is_public() {
                    Some(true) => {
                        self.retrier
                            .retry(Some(stored), || async {
                                search.publish_objects(guids).await.map_err(IndexingError::from)
                            })
                            .await?;
                    }
                    Some(false) => {
                        self.retrier
                            .retry(Some(stored), || async {
                                search.unpublish_objects(guids).await.map_err(IndexingError::from)
                            })
                            .await?;
                    }
                    None => {}
                }
                debug!(guid = %guid, "Object already indexed");
                return Ok(());
            }
        }

        self.indexer
            .index_object(
                guid,
                storage_type,
                event.timestamp(),
                event.is_public().unwrap_or(false),
                None,
            )
            .await
    }

    /// Write the terminal state of a claimed event, whatever state the store
    /// holds now. A failed write falls back to forcing `FAIL`; failing that
    /// is fatal.
    async fn finish(
        &self,
        event: &StoredStatusEvent,
        state: ProcessingState,
    ) -> Result<(), IndexingError> {
        let written = self
            .events
            .set_processing_state(&event.id, None, state, Some(&self.config.worker_id))
            .await;

        match written {
            Ok(true) => {
                info!(
                    worker_id = %self.config.worker_id,
                    event_id = %event.id,
                    state = %state,
                    "Event processed"
                );
                return Ok(());
            }
            Ok(false) => {
                return Err(IndexingError::Fatal(format!(
                    "event {} vanished from the event store",
                    event.id
                )))
            }
            Err(e) => warn!(
                event_id = %event.id,
                state = %state,
                error = %e,
                "Cannot write terminal state, forcing FAIL"
            ),
        }

        match self
            .events
            .set_processing_state(
                &event.id,
                None,
                ProcessingState::Fail,
                Some(&self.config.worker_id),
            )
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(IndexingError::Fatal(format!(
                "event {} vanished from the event store",
                event.id
            ))),
            Err(e) => Err(IndexingError::Fatal(format!(
                "cannot force event {} to FAIL: {}",
                event.id, e
            ))),
        }
    }

    /// Best effort: the loop is stopping regardless of the outcome.
    async fn force_fail(&self, event: &StoredStatusEvent) {
        let result = self
            .events
            .set_processing_state(
                &event.id,
                None,
                ProcessingState::Fail,
                Some(&self.config.worker_id),
            )
            .await;
        if let Err(e) = result {
            error!(event_id = %event.id, error = %e, "Cannot force event to FAIL");
        }
    }
}

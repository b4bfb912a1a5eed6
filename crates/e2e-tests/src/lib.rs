//! End-to-end test infrastructure for the event indexer.
//!
//! Provides a shared TestHarness that wires a RocksDB event store, a Tantivy
//! search index, YAML type rules and a local-directory source into running
//! coordinator and worker loops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use indexer_adapters::{LocalDirectoryHandler, LOCAL_STORAGE_CODE};
use indexer_pipeline::{
    CoordinatorConfig, HandlerRegistry, IndexerCoordinator, IndexerWorker, LoopHandle,
    WorkerConfig, WorkerServices,
};
use indexer_rules::load_type_rules_dir;
use indexer_search::{PostProcessing, SearchIndexConfig, SearchStorage, TantivySearchStorage};
use indexer_storage::{EventStorage, RocksEventStorage};
use indexer_types::{
    EventId, Guid, ProcessingState, RetrySettings, StatusEvent, StatusEventBuilder,
    StatusEventType, StorageObjectType, StoredStatusEvent, DEFAULT_WORKER_CODE,
};

pub use indexer_search::ObjectData;

const ASSEMBLY_RULES: &str = r#"
storage-type: FS
storage-object-type: Assembly
global-object-type: Assembly
ui-type-name: Assembly
versions:
  - indexing-rules:
      - path: name
        full-text: true
      - path: contigs
        key-name: contig_id
        transform: values
        optional-default-value: none
"#;

const GENOME_RULES: &str = r#"
storage-type: FS
storage-object-type: Genome
global-object-type: Genome
ui-type-name: Genome
versions:
  - indexing-rules:
      - path: name
        full-text: true
      - path: assembly_ref
        key-name: assembly_guid
        transform: guid.Assembly
      - source-key: assembly_guid
        key-name: assembly_name
        transform: lookup.name
"#;

const FEATURE_RULES: &str = r#"
storage-type: FS
storage-object-type: Genome
global-object-type: GenomeFeature
ui-type-name: Feature
versions:
  - inner-sub-type: feature
    path-to-sub-objects: features
    primary-key-path: id
    indexing-rules:
      - path: id
      - path: function
        full-text: true
      - path: name
        key-name: genome_name
        from-parent: true
"#;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub events: Arc<RocksEventStorage>,
    pub search: Arc<TantivySearchStorage>,
    /// Root of the local object directory
    pub source_root: PathBuf,
    pub rules_dir: PathBuf,
    /// Parent of worker temp directories
    pub temp_root: PathBuf,
}

impl TestHarness {
    /// Create a harness with empty stores and the standard type rules.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let source_root = root.join("objects");
        let rules_dir = root.join("rules");
        let temp_root = root.join("tmp");
        let index_path = root.join("index");
        for dir in [&source_root, &rules_dir, &temp_root, &index_path] {
            std::fs::create_dir_all(dir).expect("Failed to create harness dir");
        }
        for (name, yaml) in [
            ("assembly.yaml", ASSEMBLY_RULES),
            ("genome.yaml", GENOME_RULES),
            ("feature.yaml", FEATURE_RULES),
        ] {
            std::fs::write(rules_dir.join(name), yaml).expect("Failed to write type rules");
        }

        let events = Arc::new(
            RocksEventStorage::open(&root.join("events")).expect("Failed to open event store"),
        );
        let search = Arc::new(
            TantivySearchStorage::open(SearchIndexConfig::new(&index_path))
                .expect("Failed to open search index"),
        );

        Self {
            _temp_dir: temp_dir,
            events,
            search,
            source_root,
            rules_dir,
            temp_root,
        }
    }

    /// Store one object version in the local source.
    pub fn write_object(&self, access_group: i64, object_id: &str, version: u32, envelope: &Value) {
        let dir = self
            .source_root
            .join(access_group.to_string())
            .join(object_id);
        std::fs::create_dir_all(&dir).expect("Failed to create object dir");
        std::fs::write(
            dir.join(format!("{}.json", version)),
            serde_json::to_vec_pretty(envelope).expect("Failed to serialize envelope"),
        )
        .expect("Failed to write object");
    }

    pub fn services(&self) -> WorkerServices {
        let type_storage =
            Arc::new(load_type_rules_dir(&self.rules_dir).expect("Failed to load type rules"));
        WorkerServices {
            events: self.events.clone(),
            handlers: HandlerRegistry::new()
                .with_handler(Arc::new(LocalDirectoryHandler::new(&self.source_root))),
            type_storage,
            search: self.search.clone(),
        }
    }

    /// Queue an event for the coordinator.
    pub async fn submit(&self, event: StatusEvent) -> EventId {
        self.submit_with_code(event, DEFAULT_WORKER_CODE).await
    }

    pub async fn submit_with_code(&self, event: StatusEvent, worker_code: &str) -> EventId {
        self.events
            .store(event, worker_code, ProcessingState::Unproc)
            .await
            .expect("Failed to store event")
            .id
    }

    /// Start a coordinator and one worker per entry of `worker_codes`.
    pub fn start_loops(
        &self,
        cancel: &CancellationToken,
        worker_codes: &[Vec<String>],
    ) -> Vec<LoopHandle> {
        let coordinator =
            CoordinatorConfig::new(10, Duration::from_millis(10)).with_retry(fast_retry());
        let mut handles = vec![IndexerCoordinator::start(
            coordinator,
            self.events.clone(),
            cancel.clone(),
        )];
        for (i, codes) in worker_codes.iter().enumerate() {
            let config = WorkerConfig::new(format!("e2e-worker-{}", i))
                .with_codes(codes.clone())
                .with_period(Duration::from_millis(10))
                .with_temp_root(&self.temp_root)
                .with_retry(fast_retry());
            handles.push(
                IndexerWorker::start(config, self.services(), cancel.clone())
                    .expect("Failed to start worker"),
            );
        }
        handles
    }

    /// Poll until the event reaches a terminal state.
    pub async fn wait_terminal(&self, id: &EventId) -> StoredStatusEvent {
        for _ in 0..500 {
            let stored = self
                .events
                .get(id)
                .await
                .expect("Failed to read event")
                .expect("Event disappeared");
            if stored.state.is_terminal() {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event {} did not reach a terminal state", id);
    }

    pub async fn state(&self, id: &EventId) -> ProcessingState {
        self.events
            .get(id)
            .await
            .expect("Failed to read event")
            .expect("Event disappeared")
            .state
    }

    /// Non-deleted documents for a GUID, with keywords and data.
    pub async fn documents(&self, guid: &str) -> Vec<ObjectData> {
        let guid: Guid = guid.parse().expect("Invalid GUID");
        self.search
            .get_objects_by_ids(&[guid], PostProcessing::full())
            .await
            .expect("Failed to read documents")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop every loop and wait for it, asserting a graceful exit.
pub async fn stop_loops(cancel: CancellationToken, handles: Vec<LoopHandle>) {
    cancel.cancel();
    for handle in handles {
        let name = handle.name().to_string();
        handle
            .join()
            .await
            .unwrap_or_else(|e| panic!("{} stopped on error: {}", name, e));
    }
}

pub fn fast_retry() -> RetrySettings {
    RetrySettings {
        count: 2,
        delay_ms: 1,
        fatal_count: 1,
        fatal_initial_backoff_ms: 1,
        fatal_max_backoff_ms: 1,
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Envelope for one stored object version.
pub fn envelope(type_name: &str, name: &str, data: Value) -> Value {
    json!({
        "type": type_name,
        "name": name,
        "creator": "alice",
        "timestamp": base_time().to_rfc3339(),
        "data": data,
    })
}

/// A `NEW_VERSION` event for a local object, open for further options.
pub fn version_event(
    access_group: i64,
    object_id: &str,
    version: u32,
    type_name: &str,
) -> StatusEventBuilder {
    StatusEvent::builder(
        LOCAL_STORAGE_CODE,
        StatusEventType::NewVersion,
        access_group,
        base_time(),
    )
    .with_object_id(object_id)
    .with_version(version)
    .with_storage_object_type(StorageObjectType::new(LOCAL_STORAGE_CODE, type_name))
}

/// A `NEW_VERSION` event for a local object.
pub fn new_version(
    access_group: i64,
    object_id: &str,
    version: u32,
    type_name: &str,
) -> StatusEvent {
    version_event(access_group, object_id, version, type_name).build()
}

/// An event addressing every version of an object, or a whole access group
/// when `object_id` is `None`.
pub fn batch_event(
    event_type: StatusEventType,
    access_group: i64,
    object_id: Option<&str>,
) -> StatusEvent {
    let builder = StatusEvent::builder(LOCAL_STORAGE_CODE, event_type, access_group, base_time());
    match object_id {
        Some(object_id) => builder.with_object_id(object_id).build(),
        None => builder.build(),
    }
}

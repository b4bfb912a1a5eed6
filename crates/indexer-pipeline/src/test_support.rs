//! In-memory handler, recording search storage and type rules shared by the
//! pipeline tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use indexer_rules::{
    IndexingRules, MemoryTypeStorage, ObjectJsonPath, ObjectTypeParsingRules, SubObjectSpec,
};
use indexer_search::{
    ObjectData, ObjectIndexingRequest, PostProcessing, SearchError, SearchIndexConfig,
    SearchStorage, TantivySearchStorage,
};
use indexer_storage::EventStorage;
use indexer_types::{
    ChildStatusEvent, Guid, ObjectRefPath, RetrySettings, SearchObjectType, SourceData,
    StatusEvent, StatusEventType, StorageObjectType, StoredStatusEvent,
};

use crate::error::{IndexingError, UnprocessableReason};
use crate::handler::{HandlerRegistry, ResolvedReference, SourceDataHandler};
use crate::indexer::ObjectIndexer;
use crate::retrier::Retrier;
use crate::worker::WorkerServices;

pub const ASSEMBLY: &str = "WS:1/10/1";
pub const GENOME: &str = "WS:1/20/1";

pub fn guid(s: &str) -> Guid {
    s.parse().unwrap()
}

pub fn fast_retry() -> RetrySettings {
    RetrySettings {
        count: 2,
        delay_ms: 1,
        fatal_count: 1,
        fatal_initial_backoff_ms: 1,
        fatal_max_backoff_ms: 2,
    }
}

struct MockObject {
    storage_type: StorageObjectType,
    name: String,
    data: Value,
}

/// Objects held in memory under storage code `WS`. References are GUID
/// strings; references to unknown objects do not resolve.
#[derive(Default)]
pub struct MockHandler {
    objects: HashMap<Guid, MockObject>,
    children: Vec<Result<StatusEvent, String>>,
    load_failures: Mutex<VecDeque<IndexingError>>,
    loads: Mutex<Vec<Guid>>,
}

impl MockHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, guid: &str, storage_type: &str, name: &str, data: Value) -> Self {
        self.objects.insert(
            guid.parse().unwrap(),
            MockObject {
                storage_type: StorageObjectType::new("WS", storage_type),
                name: name.to_string(),
                data,
            },
        );
        self
    }

    /// Children produced for every expandable event; `Err` elements fail.
    pub fn with_children(mut self, children: Vec<Result<StatusEvent, String>>) -> Self {
        self.children = children;
        self
    }

    /// Fail the next load with `err`. Queued failures are used in order.
    pub fn fail_next_load(&self, err: IndexingError) {
        self.load_failures.lock().unwrap().push_back(err);
    }

    pub fn loads(&self) -> Vec<Guid> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceDataHandler for MockHandler {
    fn storage_code(&self) -> &str {
        "WS"
    }

    fn is_expandable(&self, event: &StoredStatusEvent) -> bool {
        let event_type = event.event.event_type();
        event_type == StatusEventType::NewAllVersions || event_type.is_access_group_level()
    }

    fn expand<'a>(
        &'a self,
        event: &'a StoredStatusEvent,
    ) -> BoxStream<'a, Result<ChildStatusEvent, IndexingError>> {
        stream::iter(self.children.iter().map(move |child| match child {
            Ok(child) => Ok(ChildStatusEvent::new(child.clone(), event.id.clone())),
            Err(message) => Err(IndexingError::unprocessable(
                UnprocessableReason::Other,
                message.clone(),
            )),
        }))
        .boxed()
    }

    async fn load(
        &self,
        ref_path: &ObjectRefPath,
        destination: &Path,
    ) -> Result<SourceData, IndexingError> {
        let failure = self.load_failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        let target = ref_path.target();
        let object = self.objects.get(target).ok_or_else(|| {
            IndexingError::unprocessable(
                UnprocessableReason::Other,
                format!("no object {}", target),
            )
        })?;
        self.loads.lock().unwrap().push(target.clone());
        tokio::fs::write(destination, object.data.to_string())
            .await
            .map_err(|e| IndexingError::Retriable(e.to_string()))?;
        Ok(SourceData::new(object.name.clone(), "alice"))
    }

    fn build_reference_paths(
        &self,
        caller_path: &ObjectRefPath,
        refs: &[String],
    ) -> Result<BTreeMap<String, String>, IndexingError> {
        Ok(refs
            .iter()
            .map(|r| (r.clone(), format!("{};{}", caller_path, r)))
            .collect())
    }

    async fn resolve_references(
        &self,
        _caller_path: &ObjectRefPath,
        refs: &[String],
    ) -> Result<Vec<ResolvedReference>, IndexingError> {
        Ok(refs
            .iter()
            .filter_map(|r| {
                let target: Guid = r.parse().ok()?;
                let object = self.objects.get(&target)?;
                Some(ResolvedReference {
                    reference: r.clone(),
                    guid: target,
                    storage_type: object.storage_type.clone(),
                    timestamp: timestamp(),
                })
            })
            .collect())
    }
}

pub fn timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Search storage that records every `index_objects` call in order.
pub struct RecordingSearch {
    pub inner: TantivySearchStorage,
    writes: Mutex<Vec<(String, Guid)>>,
}

impl RecordingSearch {
    /// `(search type name, object GUID)` per write, in write order.
    pub fn writes(&self) -> Vec<(String, Guid)> {
        self.writes.lock().unwrap().clone()
    }

    pub async fn get(&self, guid: &Guid) -> Vec<ObjectData> {
        self.inner
            .get_objects_by_ids(std::slice::from_ref(guid), PostProcessing::full())
            .await
            .unwrap()
    }
}

#[async_trait]
impl SearchStorage for RecordingSearch {
    async fn check_parent_guids_exist(
        &self,
        guids: &[Guid],
    ) -> Result<HashMap<Guid, bool>, SearchError> {
        self.inner.check_parent_guids_exist(guids).await
    }

    async fn index_objects(
        &self,
        request: ObjectIndexingRequest<'_>,
    ) -> Result<usize, SearchError> {
        self.writes.lock().unwrap().push((
            request.rules.global_object_type().type_name().to_string(),
            request.guid.clone(),
        ));
        self.inner.index_objects(request).await
    }

    async fn delete_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.inner.delete_all_versions(guid).await
    }

    async fn undelete_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.inner.undelete_all_versions(guid).await
    }

    async fn publish_objects(&self, guids: &[Guid]) -> Result<usize, SearchError> {
        self.inner.publish_objects(guids).await
    }

    async fn unpublish_objects(&self, guids: &[Guid]) -> Result<usize, SearchError> {
        self.inner.unpublish_objects(guids).await
    }

    async fn publish_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.inner.publish_all_versions(guid).await
    }

    async fn unpublish_all_versions(&self, guid: &Guid) -> Result<usize, SearchError> {
        self.inner.unpublish_all_versions(guid).await
    }

    async fn set_name_on_all_object_versions(
        &self,
        guid: &Guid,
        name: &str,
    ) -> Result<usize, SearchError> {
        self.inner.set_name_on_all_object_versions(guid, name).await
    }

    async fn get_objects_by_ids(
        &self,
        guids: &[Guid],
        post: PostProcessing,
    ) -> Result<Vec<ObjectData>, SearchError> {
        self.inner.get_objects_by_ids(guids, post).await
    }
}

fn rule(path: &str) -> IndexingRules {
    IndexingRules::from_path(ObjectJsonPath::new(path).unwrap())
        .build()
        .unwrap()
}

/// Assembly, Genome (with a feature subobject type) and Note rules.
///
/// - Genome `assembly_ref` resolves to `assembly_guid` (Assembly only) and
///   looks up the assembly's `name` as `assembly_name`.
/// - Note `link` resolves to `link_guid` (Note only).
pub fn type_storage() -> MemoryTypeStorage {
    let assembly = ObjectTypeParsingRules::builder(
        SearchObjectType::new("Assembly", 1).unwrap(),
        StorageObjectType::new("WS", "Assembly"),
    )
    .with_indexing_rule(rule("name"))
    .build()
    .unwrap();

    let genome = ObjectTypeParsingRules::builder(
        SearchObjectType::new("Genome", 1).unwrap(),
        StorageObjectType::new("WS", "Genome"),
    )
    .with_indexing_rule(rule("name"))
    .with_indexing_rule(
        IndexingRules::from_path(ObjectJsonPath::new("assembly_ref").unwrap())
            .with_key_name("assembly_guid")
            .with_transform("guid.Assembly".parse().unwrap())
            .build()
            .unwrap(),
    )
    .with_indexing_rule(
        IndexingRules::from_source_key("assembly_guid", "assembly_name")
            .with_transform("lookup.name".parse().unwrap())
            .build()
            .unwrap(),
    )
    .build()
    .unwrap();

    let feature = ObjectTypeParsingRules::builder(
        SearchObjectType::new("GenomeFeature", 1).unwrap(),
        StorageObjectType::new("WS", "Genome"),
    )
    .with_sub_object(SubObjectSpec {
        sub_object_type: "feature".to_string(),
        sub_objects_path: ObjectJsonPath::new("features").unwrap(),
        primary_key_path: ObjectJsonPath::new("id").unwrap(),
    })
    .with_indexing_rule(rule("id"))
    .with_indexing_rule(
        IndexingRules::from_path(ObjectJsonPath::new("name").unwrap())
            .with_key_name("genome_name")
            .with_from_parent(true)
            .build()
            .unwrap(),
    )
    .build()
    .unwrap();

    let note = ObjectTypeParsingRules::builder(
        SearchObjectType::new("Note", 1).unwrap(),
        StorageObjectType::new("WS", "Note"),
    )
    .with_indexing_rule(rule("name"))
    .with_indexing_rule(
        IndexingRules::from_path(ObjectJsonPath::new("link").unwrap())
            .with_key_name("link_guid")
            .with_transform("guid.Note".parse().unwrap())
            .build()
            .unwrap(),
    )
    .build()
    .unwrap();

    MemoryTypeStorage::new(vec![assembly, genome, feature, note], vec![]).unwrap()
}

/// A handler, recording search storage and type rules in a temp directory.
pub struct Fixture {
    pub dir: TempDir,
    pub handler: Arc<MockHandler>,
    pub search: Arc<RecordingSearch>,
    pub types: Arc<MemoryTypeStorage>,
}

impl Fixture {
    pub fn new(handler: MockHandler) -> Self {
        let dir = TempDir::new().unwrap();
        let inner =
            TantivySearchStorage::open(SearchIndexConfig::new(dir.path().join("index"))).unwrap();
        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
        Self {
            handler: Arc::new(handler),
            search: Arc::new(RecordingSearch {
                inner,
                writes: Mutex::new(Vec::new()),
            }),
            types: Arc::new(type_storage()),
            dir,
        }
    }

    pub fn handlers(&self) -> HandlerRegistry {
        HandlerRegistry::new().with_handler(self.handler.clone())
    }

    pub fn indexer(&self, max_subobjects: usize) -> ObjectIndexer {
        ObjectIndexer::new(
            self.handlers(),
            self.types.clone(),
            self.search.clone(),
            Retrier::new(fast_retry(), CancellationToken::new()),
            self.dir.path().join("tmp"),
            max_subobjects,
        )
    }

    pub fn services(&self, events: Arc<dyn EventStorage>) -> WorkerServices {
        WorkerServices {
            events,
            handlers: self.handlers(),
            type_storage: self.types.clone(),
            search: self.search.clone(),
        }
    }
}

/// Genome with two features referencing [`ASSEMBLY`].
pub fn genome_handler() -> MockHandler {
    MockHandler::new()
        .with_object(
            ASSEMBLY,
            "Assembly",
            "asm",
            serde_json::json!({"name": "asm one"}),
        )
        .with_object(
            GENOME,
            "Genome",
            "genome",
            serde_json::json!({
                "name": "E. coli",
                "assembly_ref": ASSEMBLY,
                "features": [{"id": "f1"}, {"id": "f2"}]
            }),
        )
}

//! RocksDB-backed event store.
//!
//! Provides:
//! - Database open with column family setup
//! - Event insertion with monotonic ULID ids
//! - State-index prefix scans
//! - Compare-and-swap transitions committed through one WriteBatch

use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use ulid::Generator;

use indexer_types::{
    EventId, ProcessingState, StatusEvent, StoredStatusEvent, DEFAULT_WORKER_CODE,
};

use crate::column_families::{build_cf_descriptors, CF_EVENTS, CF_EVENT_STATES};
use crate::error::StorageError;
use crate::event_storage::EventStorage;
use crate::keys::StateIndexKey;

/// Event store backed by a single RocksDB instance.
pub struct RocksEventStorage {
    db: DB,
    /// Serializes every read-check-write transition
    transition_lock: Mutex<()>,
    id_generator: Mutex<Generator>,
}

impl RocksEventStorage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!(path = ?path, "Opening event storage");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;

        Ok(Self {
            db,
            transition_lock: Mutex::new(()),
            id_generator: Mutex::new(Generator::new()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.transition_lock
            .lock()
            .map_err(|_| StorageError::Internal("transition lock poisoned".to_string()))
    }

    fn next_id(&self) -> Result<EventId, StorageError> {
        let mut generator = self
            .id_generator
            .lock()
            .map_err(|_| StorageError::Internal("id generator lock poisoned".to_string()))?;
        let ulid = generator
            .generate()
            .map_err(|e| StorageError::Internal(format!("ULID generation failed: {}", e)))?;
        Ok(EventId::new(ulid.to_string()))
    }

    fn read_record(&self, id: &EventId) -> Result<Option<StoredStatusEvent>, StorageError> {
        let cf = self.cf(CF_EVENTS)?;
        match self.db.get_cf(cf, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(StoredStatusEvent::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Event ids in `state`, oldest first, visited until `visit` returns false.
    fn scan_state<F>(&self, state: ProcessingState, mut visit: F) -> Result<(), StorageError>
    where
        F: FnMut(EventId) -> Result<bool, StorageError>,
    {
        let cf = self.cf(CF_EVENT_STATES)?;
        let prefix = StateIndexKey::state_prefix(state);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let index_key = StateIndexKey::from_bytes(&key)?;
            if !visit(index_key.event_id)? {
                break;
            }
        }
        Ok(())
    }

    /// Rewrite a record and its state index entry atomically.
    ///
    /// Caller must hold the transition lock.
    fn commit_transition(
        &self,
        mut record: StoredStatusEvent,
        to: ProcessingState,
        updater: Option<&str>,
    ) -> Result<StoredStatusEvent, StorageError> {
        let events_cf = self.cf(CF_EVENTS)?;
        let states_cf = self.cf(CF_EVENT_STATES)?;

        let old_key = StateIndexKey::new(record.state, record.id.clone());
        record.state = to;
        record.updated = Some(Utc::now());
        record.updater = updater.map(|u| u.to_string());
        let new_key = StateIndexKey::new(to, record.id.clone());

        let mut batch = WriteBatch::default();
        batch.delete_cf(states_cf, old_key.to_bytes());
        batch.put_cf(states_cf, new_key.to_bytes(), b"");
        batch.put_cf(events_cf, record.id.as_str().as_bytes(), record.to_bytes()?);
        self.db.write(batch)?;

        debug!(
            event_id = %record.id,
            from = %old_key.state,
            to = %to,
            updater = updater.unwrap_or("-"),
            "Event state transition"
        );
        Ok(record)
    }

    /// Number of events in each processing state.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let cf = self.cf(CF_EVENT_STATES)?;
        let mut stats = StorageStats::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let index_key = StateIndexKey::from_bytes(&key)?;
            *stats.by_state.entry(index_key.state).or_insert(0) += 1;
            stats.event_count += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl EventStorage for RocksEventStorage {
    async fn store(
        &self,
        event: StatusEvent,
        worker_code: &str,
        state: ProcessingState,
    ) -> Result<StoredStatusEvent, StorageError> {
        let record = StoredStatusEvent {
            id: self.next_id()?,
            event,
            state,
            updated: Some(Utc::now()),
            updater: None,
            worker_code: if worker_code.is_empty() {
                DEFAULT_WORKER_CODE.to_string()
            } else {
                worker_code.to_string()
            },
        };

        let events_cf = self.cf(CF_EVENTS)?;
        let states_cf = self.cf(CF_EVENT_STATES)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(events_cf, record.id.as_str().as_bytes(), record.to_bytes()?);
        batch.put_cf(
            states_cf,
            StateIndexKey::new(state, record.id.clone()).to_bytes(),
            b"",
        );

        let _guard = self.lock()?;
        self.db.write(batch)?;
        debug!(event_id = %record.id, event = %record.event, state = %state, "Stored event");
        Ok(record)
    }

    async fn get_by_state(
        &self,
        state: ProcessingState,
        limit: usize,
    ) -> Result<Vec<StoredStatusEvent>, StorageError> {
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }
        self.scan_state(state, |id| {
            if let Some(record) = self.read_record(&id)? {
                results.push(record);
            }
            Ok(results.len() < limit)
        })?;
        Ok(results)
    }

    async fn get(&self, id: &EventId) -> Result<Option<StoredStatusEvent>, StorageError> {
        self.read_record(id)
    }

    async fn set_and_get_processing_state(
        &self,
        from: ProcessingState,
        worker_codes: &[String],
        to: ProcessingState,
        claimant: &str,
    ) -> Result<Option<StoredStatusEvent>, StorageError> {
        let default_codes = [DEFAULT_WORKER_CODE.to_string()];
        let codes: &[String] = if worker_codes.is_empty() {
            &default_codes
        } else {
            worker_codes
        };

        let _guard = self.lock()?;
        let mut candidate = None;
        self.scan_state(from, |id| {
            match self.read_record(&id)? {
                Some(record) if record.state == from && codes.contains(&record.worker_code) => {
                    candidate = Some(record);
                    Ok(false)
                }
                _ => Ok(true),
            }
        })?;

        match candidate {
            Some(record) => Ok(Some(self.commit_transition(record, to, Some(claimant))?)),
            None => Ok(None),
        }
    }

    async fn set_processing_state(
        &self,
        id: &EventId,
        expected_from: Option<ProcessingState>,
        to: ProcessingState,
        updater: Option<&str>,
    ) -> Result<bool, StorageError> {
        let _guard = self.lock()?;
        let record = self
            .read_record(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if let Some(expected) = expected_from {
            if record.state != expected {
                debug!(
                    event_id = %id,
                    expected = %expected,
                    actual = %record.state,
                    "State precondition failed"
                );
                return Ok(false);
            }
        }
        self.commit_transition(record, to, updater)?;
        Ok(true)
    }
}

/// Statistics about the event store.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of events stored
    pub event_count: u64,
    /// Number of events per processing state
    pub by_state: BTreeMap<ProcessingState, u64>,
}

impl StorageStats {
    pub fn count(&self, state: ProcessingState) -> u64 {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

//! In-memory release store.
//!
//! Records live in a papaya map for lock-free reads. Writes are serialized by
//! a mutex so that resource versions, published events and list snapshots are
//! always mutually consistent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use helmrel_core::{EventBroadcaster, ReleaseKey, ReleaseRecord, ReleaseSpec, ReleaseStatus};
use papaya::HashMap as PapayaHashMap;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::{ListWatch, ReleaseStore, SchemaRegistration};

/// In-memory store backed by a papaya map and an event broadcaster.
pub struct MemoryStore {
    data: PapayaHashMap<ReleaseKey, Arc<ReleaseRecord>>,
    write_lock: Mutex<()>,
    version_counter: AtomicU64,
    broadcaster: EventBroadcaster,
    schema_registered: AtomicBool,
    status_faults: Mutex<VecDeque<StorageError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_broadcaster(EventBroadcaster::new())
    }

    /// Creates a store publishing on the given broadcaster.
    pub fn with_broadcaster(broadcaster: EventBroadcaster) -> Self {
        Self {
            data: PapayaHashMap::new(),
            write_lock: Mutex::new(()),
            version_counter: AtomicU64::new(1),
            broadcaster,
            schema_registered: AtomicBool::new(false),
            status_faults: Mutex::new(VecDeque::new()),
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_version(&self) -> u64 {
        self.version_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn commit(&self, key: ReleaseKey, record: ReleaseRecord) -> Arc<ReleaseRecord> {
        let record = Arc::new(record);
        self.data.pin().insert(key, record.clone());
        let subscribers = self.broadcaster.send_put(record.clone());
        debug!(
            key = %record.display_key(),
            resource_version = record.resource_version(),
            subscribers,
            "Stored release"
        );
        record
    }

    /// Reads a record without going through the async trait.
    pub fn get_record(&self, key: &ReleaseKey) -> Option<Arc<ReleaseRecord>> {
        self.data.pin().get(key).cloned()
    }

    /// Creates a new record. Any status on the input is discarded.
    pub fn create(&self, record: ReleaseRecord) -> Result<Arc<ReleaseRecord>, StorageError> {
        let key = record.key()?;
        let _guard = self.lock_writes();
        if self.data.pin().contains_key(&key) {
            return Err(StorageError::already_exists(&key));
        }

        let mut record = record;
        record.metadata.resource_version = self.next_version();
        record.metadata.generation = 1;
        record.metadata.creation_timestamp = Some(OffsetDateTime::now_utc());
        record.status = ReleaseStatus {
            phase: record.status.phase,
            ..ReleaseStatus::default()
        };
        Ok(self.commit(key, record))
    }

    /// Replaces the spec of a record, as a user edit would.
    ///
    /// The generation only moves when the spec actually differs.
    pub fn update_spec(
        &self,
        key: &ReleaseKey,
        spec: ReleaseSpec,
    ) -> Result<Arc<ReleaseRecord>, StorageError> {
        let _guard = self.lock_writes();
        let current = self
            .get_record(key)
            .ok_or_else(|| StorageError::not_found(key))?;

        let mut record = ReleaseRecord::clone(&current);
        if record.spec != spec {
            record.metadata.generation += 1;
        }
        record.spec = spec;
        record.metadata.resource_version = self.next_version();
        Ok(self.commit(key.clone(), record))
    }

    /// Deletes a record, returning its last stored state.
    pub fn delete(&self, key: &ReleaseKey) -> Result<Arc<ReleaseRecord>, StorageError> {
        let _guard = self.lock_writes();
        let removed = self
            .data
            .pin()
            .remove(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))?;
        let subscribers = self.broadcaster.send_deleted(removed.clone());
        debug!(key = %key, subscribers, "Deleted release");
        Ok(removed)
    }

    /// Queues an error to be returned by the next `update_status` call.
    pub fn inject_status_fault(&self, err: StorageError) {
        self.status_faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Snapshot of all records, ordered by key.
    pub fn list(&self) -> Vec<Arc<ReleaseRecord>> {
        let guard = self.data.pin();
        let mut records: Vec<_> = guard.values().cloned().collect();
        records.sort_by(|a, b| a.display_key().cmp(&b.display_key()));
        records
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Access to the broadcaster, for additional subscribers.
    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.data.len())
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReleaseStore for MemoryStore {
    async fn register_schema(&self) -> Result<SchemaRegistration, StorageError> {
        if self.schema_registered.swap(true, Ordering::SeqCst) {
            Ok(SchemaRegistration::AlreadyExists)
        } else {
            Ok(SchemaRegistration::Created)
        }
    }

    async fn list_and_watch(&self) -> Result<ListWatch, StorageError> {
        let _guard = self.lock_writes();
        let events = self.broadcaster.subscribe();
        Ok(ListWatch {
            records: self.list(),
            events,
        })
    }

    async fn get(&self, key: &ReleaseKey) -> Result<Option<Arc<ReleaseRecord>>, StorageError> {
        Ok(self.get_record(key))
    }

    async fn update_status(
        &self,
        key: &ReleaseKey,
        status: ReleaseStatus,
        expected_version: u64,
    ) -> Result<Arc<ReleaseRecord>, StorageError> {
        let injected = self
            .status_faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = injected {
            return Err(err);
        }

        let _guard = self.lock_writes();
        let current = self
            .get_record(key)
            .ok_or_else(|| StorageError::not_found(key))?;
        if current.resource_version() != expected_version {
            return Err(StorageError::conflict(
                key,
                expected_version,
                current.resource_version(),
            ));
        }

        let mut record = ReleaseRecord::clone(&current);
        record.status = status;
        record.metadata.resource_version = self.next_version();
        Ok(self.commit(key.clone(), record))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

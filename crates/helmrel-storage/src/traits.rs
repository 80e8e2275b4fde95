//! The storage/watch contract the controller depends on.

use std::sync::Arc;

use async_trait::async_trait;
use helmrel_core::{ReleaseKey, ReleaseRecord, ReleaseStatus, StoreEvent};
use tokio::sync::broadcast;

use crate::error::StorageError;

/// Outcome of declaring the release schema. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRegistration {
    Created,
    AlreadyExists,
}

/// Initial snapshot plus the stream of changes committed after it.
pub struct ListWatch {
    pub records: Vec<Arc<ReleaseRecord>>,
    pub events: broadcast::Receiver<StoreEvent>,
}

impl std::fmt::Debug for ListWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListWatch")
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

/// Storage collaborator that persists release records and streams changes.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Declares the release record schema.
    ///
    /// Idempotent: a schema that is already present yields
    /// `SchemaRegistration::AlreadyExists`, not an error.
    async fn register_schema(&self) -> Result<SchemaRegistration, StorageError>;

    /// Lists every record and subscribes to subsequent changes atomically,
    /// so no write is missed or seen twice between the two.
    async fn list_and_watch(&self) -> Result<ListWatch, StorageError>;

    /// Reads a record by key. Returns `None` if it does not exist.
    async fn get(&self, key: &ReleaseKey) -> Result<Option<Arc<ReleaseRecord>>, StorageError>;

    /// Replaces the status of a record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored resource version no
    /// longer equals `expected_version`, and `StorageError::NotFound` if the
    /// record is gone.
    async fn update_status(
        &self,
        key: &ReleaseKey,
        status: ReleaseStatus,
        expected_version: u64,
    ) -> Result<Arc<ReleaseRecord>, StorageError>;

    /// Returns the name of this store for logging.
    fn backend_name(&self) -> &'static str;
}

//! Failure Classifier and the central error sink.
//!
//! Once the work queue gives up on a key, record-attributable failures are
//! written onto the record as `phase = Failed` with the failure message.
//! This is the only place that writes `Failed`. Every given-up or fatal
//! error then goes to the [`ErrorSink`] exactly once.

use std::sync::Arc;

use helmrel_core::{Phase, ReleaseKey, ReleaseRecord, ReleaseStatus};
use helmrel_storage::{DynStore, ReleaseCache, StorageError};
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, ReconcileError};

/// Conflict retries when writing the `Failed` status.
const MAX_STATUS_ATTEMPTS: usize = 3;

/// Receives every error the controller stops retrying.
pub trait ErrorSink: Send + Sync {
    fn report(&self, key: &ReleaseKey, err: &ReconcileError);
}

/// Logs reported errors at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, key: &ReleaseKey, err: &ReconcileError) {
        error!(key = %key, kind = %err.kind(), error = %err, "Error syncing release");
    }
}

pub struct FailureClassifier {
    cache: Arc<ReleaseCache>,
    store: DynStore,
}

impl FailureClassifier {
    pub fn new(cache: Arc<ReleaseCache>, store: DynStore) -> Self {
        Self { cache, store }
    }

    /// Marks the record `Failed` if `err` is attributable to it.
    ///
    /// The failure is only written onto the generation the failed attempt
    /// deployed. A record whose spec changed since then is left alone.
    ///
    /// Returns the updated record, or `None` when nothing was written
    /// (infrastructure error, or the record is gone).
    pub async fn record_failure(
        &self,
        key: &ReleaseKey,
        err: &ReconcileError,
    ) -> Result<Option<Arc<ReleaseRecord>>, StorageError> {
        if err.kind() != ErrorKind::RecordAttributable {
            return Ok(None);
        }

        let mut current = self.cache.get(key);
        let generation = err
            .attempted_generation()
            .or_else(|| current.as_ref().map(|r| r.metadata.generation));
        for attempt in 1..=MAX_STATUS_ATTEMPTS {
            let Some(record) = current.take() else {
                debug!(key = %key, "Release gone, not recording failure");
                return Ok(None);
            };
            if Some(record.metadata.generation) != generation {
                debug!(key = %key, "Spec changed since the failed attempt, not recording it");
                return Ok(None);
            }
            if !record.phase().can_transition_to(Phase::Failed) {
                warn!(key = %key, phase = %record.phase(), "Cannot mark release Failed");
                return Ok(None);
            }

            let status = ReleaseStatus::failed(&record.status, err.to_string());
            match self
                .store
                .update_status(key, status, record.resource_version())
                .await
            {
                Ok(updated) => {
                    warn!(key = %key, message = %err, "Marked release Failed");
                    return Ok(Some(updated));
                }
                Err(e) if e.is_conflict() && attempt < MAX_STATUS_ATTEMPTS => {
                    debug!(key = %key, attempt, "Conflict writing Failed status, re-reading");
                    current = self.store.get(key).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureClassifier")
            .field("store", &self.store.backend_name())
            .finish_non_exhaustive()
    }
}

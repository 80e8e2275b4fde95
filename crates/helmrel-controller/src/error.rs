//! Reconcile error taxonomy.

use std::fmt;
use std::time::Duration;

use helmrel_backend::{BackendError, Operation};
use helmrel_core::{CoreError, ReleaseKey};
use helmrel_storage::StorageError;

/// How a reconcile failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Infrastructure noise. Retried with backoff, never touches `phase`.
    Transient,
    /// Caused by the record's declared state. Retried up to the cap, then
    /// the record is marked `Failed`.
    RecordAttributable,
    /// Contract violation. Logged and dropped without retry.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::RecordAttributable => write!(f, "record"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Failure of a single reconcile of one key.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A backend call on the install/upgrade path failed.
    #[error("{operation} failed: {source}")]
    Backend {
        key: ReleaseKey,
        /// Generation of the record the failing attempt deployed.
        generation: u64,
        operation: Operation,
        #[source]
        source: BackendError,
    },

    /// Tearing down the instance of a deleted record failed.
    #[error("uninstall of {instance} failed: {source}")]
    Uninstall {
        key: ReleaseKey,
        instance: String,
        #[source]
        source: BackendError,
    },

    /// Writing the status back to the store failed.
    #[error("status update of {key} failed: {source}")]
    StatusWrite {
        key: ReleaseKey,
        #[source]
        source: StorageError,
    },

    /// The reconcile did not finish within the configured deadline.
    #[error("reconcile of {key} timed out after {elapsed:?}")]
    Timeout { key: ReleaseKey, elapsed: Duration },

    /// The cached record does not belong to the key it is stored under.
    #[error("cached record {found} does not match key {key}")]
    KeyMismatch { key: ReleaseKey, found: String },

    /// A status write would break the phase state machine.
    #[error("refusing status update of {key}: {source}")]
    IllegalTransition {
        key: ReleaseKey,
        #[source]
        source: CoreError,
    },

    /// The reconcile panicked.
    #[error("reconcile of {key} panicked")]
    Panicked { key: ReleaseKey },
}

impl ReconcileError {
    pub fn backend(
        key: &ReleaseKey,
        generation: u64,
        operation: Operation,
        source: BackendError,
    ) -> Self {
        Self::Backend {
            key: key.clone(),
            generation,
            operation,
            source,
        }
    }

    pub fn status_write(key: &ReleaseKey, source: StorageError) -> Self {
        Self::StatusWrite {
            key: key.clone(),
            source,
        }
    }

    /// The key this error belongs to.
    pub fn key(&self) -> &ReleaseKey {
        match self {
            Self::Backend { key, .. }
            | Self::Uninstall { key, .. }
            | Self::StatusWrite { key, .. }
            | Self::Timeout { key, .. }
            | Self::KeyMismatch { key, .. }
            | Self::IllegalTransition { key, .. }
            | Self::Panicked { key } => key,
        }
    }

    /// Generation of the record the failed attempt worked from, when the
    /// failure is tied to one.
    pub fn attempted_generation(&self) -> Option<u64> {
        match self {
            Self::Backend { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    /// Classifies the failure.
    ///
    /// Backend failures on the install path belong to the record unless the
    /// backend itself was unreachable.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend { source, .. } if source.is_transient() => ErrorKind::Transient,
            Self::Backend { .. } => ErrorKind::RecordAttributable,
            Self::Uninstall { .. } | Self::StatusWrite { .. } | Self::Timeout { .. } => {
                ErrorKind::Transient
            }
            Self::KeyMismatch { .. } | Self::IllegalTransition { .. } | Self::Panicked { .. } => {
                ErrorKind::Fatal
            }
        }
    }
}

/// Errors that stop the controller itself.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("informer cache did not sync within {0:?}")]
    CacheSyncTimeout(Duration),

    #[error("invalid controller configuration: {0}")]
    InvalidConfig(String),
}

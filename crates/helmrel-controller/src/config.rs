//! Immutable controller settings.

use std::time::Duration;

use crate::error::ControllerError;
use crate::queue::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, ExponentialBackoff};

/// Chart repository used when a release does not name one.
pub const DEFAULT_REPO_URL: &str = "https://kubernetes-charts.storage.googleapis.com";

/// Settings handed to the controller at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Rate-limited requeues before a failing key is given up on.
    pub max_retries: u32,
    pub backoff: ExponentialBackoff,
    /// Informer resync period. Zero disables resync.
    pub resync_interval: Duration,
    /// Deadline of a single reconcile. `None` means no deadline.
    pub reconcile_timeout: Option<Duration>,
    pub default_repo_url: String,
    /// How long to wait for the initial cache sync before giving up.
    pub cache_sync_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 5,
            backoff: ExponentialBackoff::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX),
            resync_interval: Duration::from_secs(300),
            reconcile_timeout: None,
            default_repo_url: DEFAULT_REPO_URL.to_string(),
            cache_sync_timeout: Duration::from_secs(60),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "workers must be at least 1".into(),
            ));
        }
        if self.default_repo_url.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "default_repo_url must not be empty".into(),
            ));
        }
        if self.backoff.base > self.backoff.max {
            return Err(ControllerError::InvalidConfig(
                "backoff base must not exceed backoff max".into(),
            ));
        }
        if self.reconcile_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ControllerError::InvalidConfig(
                "reconcile_timeout must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

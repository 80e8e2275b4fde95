//! The deployment backend contract.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::{
    ChartArchive, ChartLocator, Credentials, DeployedRelease, InstanceStatus, Package,
    UpgradeFlags,
};

/// Remote deployment backend: chart resolution plus release lifecycle.
///
/// Implementations must be thread-safe (`Send + Sync`). Install and upgrade
/// must be safe to re-drive after a partial failure.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    /// Resolves a repository URL, chart name and version constraint (empty
    /// means latest) to a concrete download location.
    async fn resolve_source(
        &self,
        repo_url: &str,
        chart: &str,
        version: &str,
        credentials: &Credentials,
    ) -> Result<ChartLocator, BackendError>;

    /// Downloads a chart into the local cache.
    async fn download(&self, locator: &ChartLocator) -> Result<ChartArchive, BackendError>;

    /// Loads a previously downloaded chart.
    async fn load_package(&self, archive: &ChartArchive) -> Result<Package, BackendError>;

    /// Installs `package` as a new instance called `instance`.
    async fn install(
        &self,
        package: &Package,
        namespace: &str,
        values: &str,
        instance: &str,
    ) -> Result<DeployedRelease, BackendError>;

    /// Upgrades an existing instance to `package`.
    async fn upgrade(
        &self,
        instance: &str,
        package: &Package,
        values: &str,
        flags: UpgradeFlags,
    ) -> Result<DeployedRelease, BackendError>;

    /// Removes an instance. With `purge`, its history is dropped too.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the instance does not exist.
    async fn uninstall(&self, instance: &str, purge: bool) -> Result<(), BackendError>;

    /// Returns at most `limit` revisions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the instance was never installed.
    async fn history(
        &self,
        instance: &str,
        limit: usize,
    ) -> Result<Vec<DeployedRelease>, BackendError>;

    /// Reads the current status of an instance.
    async fn release_status(&self, instance: &str) -> Result<InstanceStatus, BackendError>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Returns the name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}

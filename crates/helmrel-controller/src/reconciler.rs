//! Reconciler: converges one release record with the deployment backend.

use std::sync::Arc;

use helmrel_backend::{Credentials, DeployedRelease, DynBackend, Operation, UpgradeFlags};
use helmrel_core::{ReleaseKey, ReleaseRecord, ReleaseStatus};
use helmrel_storage::{DynStore, ReleaseCache};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::ReconcileError;

/// Outcome of a successful reconcile, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Installed { revision: u32 },
    Upgraded { revision: u32 },
    Uninstalled,
    /// The record was deleted and no instance existed.
    AlreadyGone,
    Paused,
}

pub struct Reconciler {
    config: Arc<ControllerConfig>,
    cache: Arc<ReleaseCache>,
    store: DynStore,
    backend: DynBackend,
}

impl Reconciler {
    pub fn new(
        config: Arc<ControllerConfig>,
        cache: Arc<ReleaseCache>,
        store: DynStore,
        backend: DynBackend,
    ) -> Self {
        Self {
            config,
            cache,
            store,
            backend,
        }
    }

    /// Brings the deployed instance of `key` in line with its record.
    ///
    /// Only the cached spec drives the decision; the cached status is
    /// never read back except for the phase check on write.
    pub async fn reconcile(&self, key: &ReleaseKey) -> Result<Action, ReconcileError> {
        let Some(record) = self.cache.get(key) else {
            return self.uninstall(key).await;
        };

        let found = record.display_key();
        if found != key.to_string() {
            return Err(ReconcileError::KeyMismatch {
                key: key.clone(),
                found,
            });
        }

        if record.spec.paused {
            info!(key = %key, "Release is paused, skipping");
            return Ok(Action::Paused);
        }

        self.deploy(key, &record).await
    }

    async fn uninstall(&self, key: &ReleaseKey) -> Result<Action, ReconcileError> {
        let instance = key.instance_name();
        info!(key = %key, instance = %instance, "Release deleted, uninstalling");
        match self.backend.uninstall(&instance, true).await {
            Ok(()) => Ok(Action::Uninstalled),
            Err(e) if e.is_not_found() => {
                debug!(instance = %instance, "Instance already gone");
                Ok(Action::AlreadyGone)
            }
            Err(source) => Err(ReconcileError::Uninstall {
                key: key.clone(),
                instance,
                source,
            }),
        }
    }

    async fn deploy(
        &self,
        key: &ReleaseKey,
        record: &ReleaseRecord,
    ) -> Result<Action, ReconcileError> {
        let spec = &record.spec;
        let instance = key.instance_name();
        let repo_url = spec
            .repo_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(&self.config.default_repo_url);
        let credentials = Credentials::new(spec.username.clone(), spec.password.clone());
        let generation = record.metadata.generation;

        let locator = self
            .backend
            .resolve_source(repo_url, &spec.chart_name, &spec.version, &credentials)
            .await
            .map_err(|e| ReconcileError::backend(key, generation, Operation::ResolveSource, e))?;
        debug!(key = %key, url = %locator.url, "Resolved chart");

        let archive = self
            .backend
            .download(&locator)
            .await
            .map_err(|e| ReconcileError::backend(key, generation, Operation::Download, e))?;
        let package = self
            .backend
            .load_package(&archive)
            .await
            .map_err(|e| ReconcileError::backend(key, generation, Operation::LoadPackage, e))?;

        let (release, action) = match self.backend.history(&instance, 1).await {
            Err(e) if e.is_not_found() => {
                info!(key = %key, instance = %instance, namespace = %key.namespace, "Installing release");
                let release = self
                    .backend
                    .install(&package, &key.namespace, &spec.values, &instance)
                    .await
                    .map_err(|e| ReconcileError::backend(key, generation, Operation::Install, e))?;
                let revision = release.revision;
                (release, Action::Installed { revision })
            }
            Ok(_) => {
                let flags = UpgradeFlags {
                    force: spec.force,
                    recreate: spec.recreate,
                };
                info!(
                    key = %key,
                    instance = %instance,
                    force = flags.force,
                    recreate = flags.recreate,
                    "Upgrading release"
                );
                let release = self
                    .backend
                    .upgrade(&instance, &package, &spec.values, flags)
                    .await
                    .map_err(|e| ReconcileError::backend(key, generation, Operation::Upgrade, e))?;
                let revision = release.revision;
                (release, Action::Upgraded { revision })
            }
            Err(e) => return Err(ReconcileError::backend(key, generation, Operation::History, e)),
        };

        self.log_release_status(&release).await;
        self.write_ready(key, record, release.revision, package.source_url)
            .await?;
        Ok(action)
    }

    async fn log_release_status(&self, release: &DeployedRelease) {
        match self.backend.release_status(&release.name).await {
            Ok(status) => info!(
                instance = %release.name,
                revision = release.revision,
                state = %status.state,
                "Installed/upgraded release"
            ),
            Err(e) => warn!(
                instance = %release.name,
                error = %e,
                "Cannot read status of release"
            ),
        }
    }

    /// Writes a fresh `Ready` status, conflict-checked against the version
    /// of the record the decision was based on.
    async fn write_ready(
        &self,
        key: &ReleaseKey,
        record: &ReleaseRecord,
        revision: u32,
        chart_url: String,
    ) -> Result<(), ReconcileError> {
        let status = ReleaseStatus::ready(revision, chart_url);
        record
            .phase()
            .transition(status.phase)
            .map_err(|source| ReconcileError::IllegalTransition {
                key: key.clone(),
                source,
            })?;

        self.store
            .update_status(key, status, record.resource_version())
            .await
            .map_err(|e| ReconcileError::status_write(key, e))?;
        debug!(key = %key, revision, "Wrote Ready status");
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("backend", &self.backend.backend_name())
            .field("store", &self.store.backend_name())
            .field("default_repo_url", &self.config.default_repo_url)
            .finish()
    }
}

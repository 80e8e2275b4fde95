//! Simulated deployment backend.
//!
//! Holds a chart catalogue per repository and a revision history per
//! instance. Every call is journaled, faults can be scripted per operation,
//! and overlapping calls against the same instance are counted so tests can
//! assert per-instance serialization.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::BackendError;
use crate::traits::DeploymentBackend;
use crate::types::{
    ChartArchive, ChartLocator, Credentials, DeployedRelease, DeploymentState, InstanceStatus,
    Operation, Package, UpgradeFlags,
};

/// A journaled backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ResolveSource {
        repo_url: String,
        chart: String,
        version: String,
    },
    Download {
        url: String,
    },
    LoadPackage {
        archive_id: String,
    },
    Install {
        instance: String,
        namespace: String,
        chart: String,
        version: String,
        values: String,
    },
    Upgrade {
        instance: String,
        chart: String,
        version: String,
        values: String,
        flags: UpgradeFlags,
    },
    Uninstall {
        instance: String,
        purge: bool,
    },
    History {
        instance: String,
        limit: usize,
    },
    ReleaseStatus {
        instance: String,
    },
    Ping,
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Call::ResolveSource { .. } => Operation::ResolveSource,
            Call::Download { .. } => Operation::Download,
            Call::LoadPackage { .. } => Operation::LoadPackage,
            Call::Install { .. } => Operation::Install,
            Call::Upgrade { .. } => Operation::Upgrade,
            Call::Uninstall { .. } => Operation::Uninstall,
            Call::History { .. } => Operation::History,
            Call::ReleaseStatus { .. } => Operation::ReleaseStatus,
            Call::Ping => Operation::Ping,
        }
    }

    /// Instance the call acts on, if any.
    pub fn instance(&self) -> Option<&str> {
        match self {
            Call::Install { instance, .. }
            | Call::Upgrade { instance, .. }
            | Call::Uninstall { instance, .. }
            | Call::History { instance, .. }
            | Call::ReleaseStatus { instance } => Some(instance),
            _ => None,
        }
    }
}

#[derive(Default)]
struct State {
    /// repo URL -> chart -> versions, oldest first
    catalogue: HashMap<String, HashMap<String, Vec<String>>>,
    credentials: HashMap<String, Credentials>,
    archives: HashMap<String, ChartArchive>,
    /// instance -> revisions, oldest first
    releases: HashMap<String, Vec<DeployedRelease>>,
    faults: HashMap<Operation, VecDeque<BackendError>>,
    journal: Vec<Call>,
}

/// In-memory [`DeploymentBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    in_flight: Mutex<HashMap<String, usize>>,
    overlaps: AtomicUsize,
    archive_counter: AtomicU64,
    latency: Duration,
}

struct InFlight<'a> {
    backend: &'a MemoryBackend,
    instance: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .backend
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = in_flight.get_mut(&self.instance) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.instance);
            }
        }
    }
}

fn normalize_repo(repo_url: &str) -> &str {
    repo_url.trim_end_matches('/')
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chart with the given versions (oldest first) to a repository.
    pub fn with_chart(self, repo_url: &str, chart: &str, versions: &[&str]) -> Self {
        self.add_chart(repo_url, chart, versions);
        self
    }

    /// Simulated latency of every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn add_chart(&self, repo_url: &str, chart: &str, versions: &[&str]) {
        let mut state = self.lock();
        let entry = state
            .catalogue
            .entry(normalize_repo(repo_url).to_string())
            .or_default()
            .entry(chart.to_string())
            .or_default();
        entry.extend(versions.iter().map(|v| v.to_string()));
    }

    /// Requires these credentials for resolving charts in `repo_url`.
    pub fn require_credentials(&self, repo_url: &str, credentials: Credentials) {
        self.lock()
            .credentials
            .insert(normalize_repo(repo_url).to_string(), credentials);
    }

    /// Makes the next call of `operation` fail with `err`.
    pub fn fail_next(&self, operation: Operation, err: BackendError) {
        self.fail_times(operation, 1, err);
    }

    /// Makes the next `times` calls of `operation` fail with `err`.
    pub fn fail_times(&self, operation: Operation, times: usize, err: BackendError) {
        let mut state = self.lock();
        let queue = state.faults.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(err, times));
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().journal.clone()
    }

    /// Number of calls made of `operation`.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().journal.clear();
    }

    /// Revisions of an instance, oldest first.
    pub fn revisions(&self, instance: &str) -> Vec<DeployedRelease> {
        self.lock()
            .releases
            .get(instance)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of times a call started while another call on the same
    /// instance was still running.
    pub fn overlap_count(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journals the call, waits out the simulated latency and pops a
    /// scripted fault if one is queued.
    async fn enter(&self, call: Call) -> Result<Option<InFlight<'_>>, BackendError> {
        debug!(operation = %call.operation(), instance = ?call.instance(), "Backend call");
        let operation = call.operation();
        let guard = call.instance().map(|instance| self.begin(instance));
        self.lock().journal.push(call);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let fault = self
            .lock()
            .faults
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(err) => Err(err),
            None => Ok(guard),
        }
    }

    fn begin(&self, instance: &str) -> InFlight<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let count = in_flight.entry(instance.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
            warn!(instance, concurrent = *count, "Overlapping calls on instance");
        }
        InFlight {
            backend: self,
            instance: instance.to_string(),
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBackend")
            .field("repositories", &state.catalogue.len())
            .field("instances", &state.releases.len())
            .field("calls", &state.journal.len())
            .field("latency", &self.latency)
            .finish()
    }
}

fn live_history<'a>(
    state: &'a mut State,
    instance: &str,
) -> Result<&'a mut Vec<DeployedRelease>, BackendError> {
    match state.releases.get_mut(instance) {
        Some(history)
            if history
                .last()
                .is_some_and(|r| r.state != DeploymentState::Deleted) =>
        {
            Ok(history)
        }
        _ => Err(BackendError::not_found(instance)),
    }
}

fn push_revision(history: &mut Vec<DeployedRelease>, mut release: DeployedRelease) -> DeployedRelease {
    if let Some(previous) = history.last_mut() {
        release.revision = previous.revision + 1;
        if previous.state == DeploymentState::Deployed {
            previous.state = DeploymentState::Superseded;
        }
    } else {
        release.revision = 1;
    }
    history.push(release.clone());
    release
}

#[async_trait]
impl DeploymentBackend for MemoryBackend {
    async fn resolve_source(
        &self,
        repo_url: &str,
        chart: &str,
        version: &str,
        credentials: &Credentials,
    ) -> Result<ChartLocator, BackendError> {
        self.enter(Call::ResolveSource {
            repo_url: repo_url.to_string(),
            chart: chart.to_string(),
            version: version.to_string(),
        })
        .await?;

        let repo = normalize_repo(repo_url);
        let state = self.lock();
        if let Some(required) = state.credentials.get(repo) {
            if required != credentials {
                return Err(BackendError::resolve(
                    repo,
                    chart,
                    version,
                    "401 Unauthorized",
                ));
            }
        }

        let versions = state
            .catalogue
            .get(repo)
            .and_then(|charts| charts.get(chart))
            .ok_or_else(|| {
                BackendError::resolve(repo, chart, version, "chart not found in repository")
            })?;
        let resolved = if version.is_empty() {
            versions.last()
        } else {
            versions.iter().find(|v| *v == version)
        }
        .ok_or_else(|| BackendError::resolve(repo, chart, version, "no chart version found"))?;

        Ok(ChartLocator {
            url: format!("{repo}/{chart}-{resolved}.tgz"),
            chart: chart.to_string(),
            version: resolved.clone(),
        })
    }

    async fn download(&self, locator: &ChartLocator) -> Result<ChartArchive, BackendError> {
        self.enter(Call::Download {
            url: locator.url.clone(),
        })
        .await?;

        let id = format!(
            "archive-{}",
            self.archive_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        let archive = ChartArchive {
            id: id.clone(),
            locator: locator.clone(),
        };
        self.lock().archives.insert(id, archive.clone());
        Ok(archive)
    }

    async fn load_package(&self, archive: &ChartArchive) -> Result<Package, BackendError> {
        self.enter(Call::LoadPackage {
            archive_id: archive.id.clone(),
        })
        .await?;

        let state = self.lock();
        let cached = state.archives.get(&archive.id).ok_or_else(|| {
            BackendError::invalid_package(format!("archive {} is not in the cache", archive.id))
        })?;
        Ok(Package {
            name: cached.locator.chart.clone(),
            version: cached.locator.version.clone(),
            source_url: cached.locator.url.clone(),
        })
    }

    async fn install(
        &self,
        package: &Package,
        namespace: &str,
        values: &str,
        instance: &str,
    ) -> Result<DeployedRelease, BackendError> {
        let _guard = self
            .enter(Call::Install {
                instance: instance.to_string(),
                namespace: namespace.to_string(),
                chart: package.name.clone(),
                version: package.version.clone(),
                values: values.to_string(),
            })
            .await?;

        let mut state = self.lock();
        if live_history(&mut state, instance).is_ok() {
            return Err(BackendError::rejected(
                Operation::Install,
                format!("cannot re-use a name that is still in use: {instance}"),
            ));
        }
        let history = state.releases.entry(instance.to_string()).or_default();
        Ok(push_revision(
            history,
            DeployedRelease {
                name: instance.to_string(),
                namespace: namespace.to_string(),
                revision: 0,
                chart: package.name.clone(),
                chart_version: package.version.clone(),
                state: DeploymentState::Deployed,
            },
        ))
    }

    async fn upgrade(
        &self,
        instance: &str,
        package: &Package,
        values: &str,
        flags: UpgradeFlags,
    ) -> Result<DeployedRelease, BackendError> {
        let _guard = self
            .enter(Call::Upgrade {
                instance: instance.to_string(),
                chart: package.name.clone(),
                version: package.version.clone(),
                values: values.to_string(),
                flags,
            })
            .await?;

        let mut state = self.lock();
        let history = live_history(&mut state, instance)?;
        let namespace = history
            .last()
            .map(|r| r.namespace.clone())
            .unwrap_or_default();
        Ok(push_revision(
            history,
            DeployedRelease {
                name: instance.to_string(),
                namespace,
                revision: 0,
                chart: package.name.clone(),
                chart_version: package.version.clone(),
                state: DeploymentState::Deployed,
            },
        ))
    }

    async fn uninstall(&self, instance: &str, purge: bool) -> Result<(), BackendError> {
        let _guard = self
            .enter(Call::Uninstall {
                instance: instance.to_string(),
                purge,
            })
            .await?;

        let mut state = self.lock();
        if purge {
            return state
                .releases
                .remove(instance)
                .map(|_| ())
                .ok_or_else(|| BackendError::not_found(instance));
        }
        let history = live_history(&mut state, instance)?;
        if let Some(latest) = history.last_mut() {
            latest.state = DeploymentState::Deleted;
        }
        Ok(())
    }

    async fn history(
        &self,
        instance: &str,
        limit: usize,
    ) -> Result<Vec<DeployedRelease>, BackendError> {
        let _guard = self
            .enter(Call::History {
                instance: instance.to_string(),
                limit,
            })
            .await?;

        let state = self.lock();
        let history = state
            .releases
            .get(instance)
            .ok_or_else(|| BackendError::not_found(instance))?;
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    async fn release_status(&self, instance: &str) -> Result<InstanceStatus, BackendError> {
        let _guard = self
            .enter(Call::ReleaseStatus {
                instance: instance.to_string(),
            })
            .await?;

        let state = self.lock();
        let latest = state
            .releases
            .get(instance)
            .and_then(|history| history.last())
            .ok_or_else(|| BackendError::not_found(instance))?;
        Ok(InstanceStatus {
            name: latest.name.clone(),
            namespace: latest.namespace.clone(),
            revision: latest.revision,
            state: latest.state,
        })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.enter(Call::Ping).await.map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "https://charts.example.com";

    fn backend() -> MemoryBackend {
        MemoryBackend::new().with_chart(REPO, "nginx", &["1.2.0", "1.3.0"])
    }

    async fn package(backend: &MemoryBackend, version: &str) -> Package {
        let locator = backend
            .resolve_source(REPO, "nginx", version, &Credentials::default())
            .await
            .unwrap();
        let archive = backend.download(&locator).await.unwrap();
        backend.load_package(&archive).await.unwrap()
    }

    #[tokio::test]
    async fn test_resolve_source() {
        let backend = backend();
        let locator = backend
            .resolve_source(&format!("{REPO}/"), "nginx", "", &Credentials::default())
            .await
            .unwrap();
        assert_eq!(locator.version, "1.3.0");
        assert_eq!(locator.url, "https://charts.example.com/nginx-1.3.0.tgz");

        let err = backend
            .resolve_source(REPO, "nginx", "9.9.9", &Credentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Resolve { .. }));

        let err = backend
            .resolve_source(REPO, "redis", "", &Credentials::default())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_private_repository_requires_credentials() {
        let backend = backend();
        let creds = Credentials::new(Some("ci".into()), Some("s3cret".into()));
        backend.require_credentials(REPO, creds.clone());

        assert!(
            backend
                .resolve_source(REPO, "nginx", "1.2.0", &Credentials::default())
                .await
                .is_err()
        );
        assert!(
            backend
                .resolve_source(REPO, "nginx", "1.2.0", &creds)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_install_upgrade_history() {
        let backend = backend();
        let err = backend.history("default-web", 1).await.unwrap_err();
        assert!(err.is_not_found());

        let v1 = package(&backend, "1.2.0").await;
        let installed = backend
            .install(&v1, "default", "", "default-web")
            .await
            .unwrap();
        assert_eq!(installed.revision, 1);

        let again = backend.install(&v1, "default", "", "default-web").await;
        assert!(matches!(again, Err(BackendError::Rejected { .. })));

        let v2 = package(&backend, "1.3.0").await;
        let upgraded = backend
            .upgrade("default-web", &v2, "replicas: 2", UpgradeFlags::default())
            .await
            .unwrap();
        assert_eq!(upgraded.revision, 2);

        let history = backend.history("default-web", 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].revision, 2);
        assert_eq!(history[0].chart_version, "1.3.0");

        let status = backend.release_status("default-web").await.unwrap();
        assert_eq!(status.state, DeploymentState::Deployed);
        assert_eq!(
            backend.revisions("default-web")[0].state,
            DeploymentState::Superseded
        );
    }

    #[tokio::test]
    async fn test_uninstall() {
        let backend = backend();
        let err = backend.uninstall("default-web", true).await.unwrap_err();
        assert!(err.is_not_found());

        let v1 = package(&backend, "1.2.0").await;
        backend
            .install(&v1, "default", "", "default-web")
            .await
            .unwrap();
        backend.uninstall("default-web", true).await.unwrap();
        assert!(backend.revisions("default-web").is_empty());
        assert!(backend.history("default-web", 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_uninstall_without_purge_keeps_history() {
        let backend = backend();
        let v1 = package(&backend, "1.2.0").await;
        backend
            .install(&v1, "default", "", "default-web")
            .await
            .unwrap();
        backend.uninstall("default-web", false).await.unwrap();

        let history = backend.history("default-web", 10).await.unwrap();
        assert_eq!(history[0].state, DeploymentState::Deleted);

        let reinstalled = backend
            .install(&v1, "default", "", "default-web")
            .await
            .unwrap();
        assert_eq!(reinstalled.revision, 2);
    }

    #[tokio::test]
    async fn test_scripted_faults_and_journal() {
        let backend = backend();
        backend.fail_times(
            Operation::Ping,
            2,
            BackendError::unavailable(Operation::Ping, "connection refused"),
        );
        assert!(backend.ping().await.unwrap_err().is_transient());
        assert!(backend.ping().await.is_err());
        assert!(backend.ping().await.is_ok());
        assert_eq!(backend.call_count(Operation::Ping), 3);

        backend.clear_calls();
        backend.uninstall("default-web", true).await.unwrap_err();
        assert_eq!(
            backend.calls(),
            vec![Call::Uninstall {
                instance: "default-web".into(),
                purge: true
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_calls_are_counted() {
        let backend = std::sync::Arc::new(backend().with_latency(Duration::from_millis(10)));
        let a = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.history("default-web", 1).await })
        };
        let b = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.history("default-web", 1).await })
        };
        let _ = a.await.unwrap();
        let _ = b.await.unwrap();
        assert_eq!(backend.overlap_count(), 1);

        backend.history("default-api", 1).await.unwrap_err();
        assert_eq!(backend.overlap_count(), 1);
    }
}

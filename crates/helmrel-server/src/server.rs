use std::sync::Arc;

use anyhow::Context;
use helmrel_backend::DynBackend;
use helmrel_controller::Controller;
use helmrel_storage::{DynStore, MemoryStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bootstrap;
use crate::config::AppConfig;
use crate::manifests::ManifestSync;

pub struct HelmrelServer {
    config: AppConfig,
    store: Arc<MemoryStore>,
    backend: DynBackend,
    manifests: Option<Arc<ManifestSync>>,
}

#[derive(Default)]
pub struct ServerBuilder {
    config: AppConfig,
    backend: Option<DynBackend>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Use this backend instead of the one described by `backend.kind`.
    pub fn with_backend(mut self, backend: DynBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Runs the startup checks and loads the manifest directory.
    pub async fn build(self) -> anyhow::Result<HelmrelServer> {
        let config = self.config;
        config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid configuration")?;

        let store = Arc::new(MemoryStore::new());
        bootstrap::register_schema(store.as_ref()).await?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => bootstrap::build_backend(&config.backend)?,
        };
        bootstrap::check_backend(backend.as_ref()).await?;

        let manifests = match &config.manifests.dir {
            Some(dir) => {
                let sync = Arc::new(ManifestSync::new(dir, store.clone()));
                sync.load_all()
                    .with_context(|| format!("failed to load manifests from {}", dir.display()))?;
                Some(sync)
            }
            None => None,
        };

        Ok(HelmrelServer {
            config,
            store,
            backend,
            manifests,
        })
    }
}

impl HelmrelServer {
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn backend(&self) -> &DynBackend {
        &self.backend
    }

    /// Runs the controller until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let watcher = match &self.manifests {
            Some(sync) => Some(sync.clone().watch(self.config.manifests.debounce())?),
            None => None,
        };

        let store: DynStore = self.store.clone();
        let controller = Controller::new(self.config.to_controller_config(), store, self.backend);
        info!(
            workers = controller.config().workers,
            records = self.store.len(),
            "Starting release controller"
        );
        let result = controller.run(shutdown).await;

        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
        result.context("release controller failed")?;
        info!("Release controller stopped");
        Ok(())
    }
}

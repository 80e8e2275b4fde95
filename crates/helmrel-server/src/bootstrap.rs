//! Startup checks run before the controller starts.
//!
//! Anything that fails here aborts startup with a non-zero exit.

use std::sync::Arc;

use anyhow::{Context, Result};
use helmrel_backend::{DeploymentBackend, DynBackend, HttpBackend, MemoryBackend};
use helmrel_storage::{ReleaseStore, SchemaRegistration};
use tracing::info;

use crate::config::{BackendKind, BackendSettings};

/// Registers the release record schema. An existing schema is not an error.
pub async fn register_schema(store: &dyn ReleaseStore) -> Result<SchemaRegistration> {
    let registration = store
        .register_schema()
        .await
        .context("failed to register release schema")?;
    match registration {
        SchemaRegistration::Created => info!(store = store.backend_name(), "Release schema registered"),
        SchemaRegistration::AlreadyExists => {
            info!(store = store.backend_name(), "Release schema already registered")
        }
    }
    Ok(registration)
}

/// Creates the deployment backend selected by `backend.kind`.
pub fn build_backend(settings: &BackendSettings) -> Result<DynBackend> {
    match settings.kind {
        BackendKind::Memory => {
            let backend = MemoryBackend::new();
            for chart in &settings.charts {
                let versions: Vec<&str> = chart.versions.iter().map(String::as_str).collect();
                backend.add_chart(&chart.repo_url, &chart.name, &versions);
            }
            info!(charts = settings.charts.len(), "Using in-memory deployment backend");
            Ok(Arc::new(backend))
        }
        BackendKind::Http => {
            let target = settings
                .target
                .as_deref()
                .context("backend.target is required for the http backend")?;
            let backend = HttpBackend::new(target, settings.connect_timeout())
                .with_context(|| format!("failed to create http backend for {target}"))?;
            info!(target = %backend.target(), "Using http deployment backend");
            Ok(Arc::new(backend))
        }
    }
}

/// Verifies the backend is reachable.
pub async fn check_backend(backend: &dyn DeploymentBackend) -> Result<()> {
    backend
        .ping()
        .await
        .with_context(|| format!("{} backend is not reachable", backend.backend_name()))?;
    info!(backend = backend.backend_name(), "Deployment backend reachable");
    Ok(())
}

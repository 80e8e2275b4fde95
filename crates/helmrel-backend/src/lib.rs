//! # helmrel-backend
//!
//! Deployment backend collaborator for the release controller: chart
//! resolution, download and loading, plus the install / upgrade / uninstall /
//! history lifecycle of deployed instances.
//!
//! Two implementations are provided:
//! - [`MemoryBackend`]: simulated backend with fault injection and a call
//!   journal
//! - [`HttpBackend`]: JSON client for a remote deployment service

mod error;
pub mod http;
pub mod memory;
mod traits;
mod types;

pub use error::BackendError;
pub use http::HttpBackend;
pub use memory::{Call, MemoryBackend};
pub use traits::DeploymentBackend;
pub use types::{
    ChartArchive, ChartLocator, Credentials, DeployedRelease, DeploymentState, InstanceStatus,
    Operation, Package, UpgradeFlags,
};

/// Type alias for a shared backend trait object.
pub type DynBackend = std::sync::Arc<dyn DeploymentBackend>;

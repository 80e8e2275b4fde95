//! Values exchanged with a deployment backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend operation, used for error context and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ResolveSource,
    Download,
    LoadPackage,
    Install,
    Upgrade,
    Uninstall,
    History,
    ReleaseStatus,
    Ping,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ResolveSource => "resolve_source",
            Operation::Download => "download",
            Operation::LoadPackage => "load_package",
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Uninstall => "uninstall",
            Operation::History => "history",
            Operation::ReleaseStatus => "release_status",
            Operation::Ping => "ping",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository credentials. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Concrete download location of a chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartLocator {
    pub url: String,
    pub chart: String,
    /// Concrete version the constraint resolved to.
    pub version: String,
}

/// A chart downloaded into the backend's local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartArchive {
    /// Cache entry identifier.
    pub id: String,
    pub locator: ChartLocator,
}

/// A loaded chart, ready to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub version: String,
    /// URL the package was downloaded from.
    pub source_url: String,
}

/// Flags applied during an upgrade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeFlags {
    pub force: bool,
    pub recreate: bool,
}

/// Lifecycle state of a deployed revision, as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    #[default]
    Unknown,
    Deployed,
    Superseded,
    Failed,
    Deleted,
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentState::Unknown => "UNKNOWN",
            DeploymentState::Deployed => "DEPLOYED",
            DeploymentState::Superseded => "SUPERSEDED",
            DeploymentState::Failed => "FAILED",
            DeploymentState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// One revision of a deployed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedRelease {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub chart: String,
    pub chart_version: String,
    #[serde(default)]
    pub state: DeploymentState,
}

/// Current status of a deployed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub state: DeploymentState,
}

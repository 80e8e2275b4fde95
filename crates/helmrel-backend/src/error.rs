//! Deployment backend errors.

use crate::types::Operation;

/// Errors returned by a [`DeploymentBackend`](crate::DeploymentBackend).
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The named release instance does not exist.
    #[error("release: \"{instance}\" not found")]
    NotFound { instance: String },

    /// The backend could not be reached or failed internally.
    #[error("Backend unavailable during {operation}: {message}")]
    Unavailable {
        operation: Operation,
        message: String,
    },

    /// The chart source could not be resolved to a download location.
    #[error("Cannot resolve chart {chart} (version {version:?}) in {repo_url}: {message}")]
    Resolve {
        repo_url: String,
        chart: String,
        version: String,
        message: String,
    },

    /// Downloading the resolved chart failed.
    #[error("Cannot download chart from {url}: {message}")]
    Download { url: String, message: String },

    /// The downloaded archive is not a loadable package.
    #[error("Invalid chart package: {message}")]
    InvalidPackage { message: String },

    /// The backend refused the operation.
    #[error("Backend rejected {operation}: {message}")]
    Rejected {
        operation: Operation,
        message: String,
    },
}

impl BackendError {
    #[must_use]
    pub fn not_found(instance: impl Into<String>) -> Self {
        Self::NotFound {
            instance: instance.into(),
        }
    }

    #[must_use]
    pub fn unavailable(operation: Operation, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn resolve(
        repo_url: impl Into<String>,
        chart: impl Into<String>,
        version: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Resolve {
            repo_url: repo_url.into(),
            chart: chart.into(),
            version: version.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_package(message: impl Into<String>) -> Self {
        Self::InvalidPackage {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(operation: Operation, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }

    /// Returns `true` if the release instance does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for infrastructure failures that may go away on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

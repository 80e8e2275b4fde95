//! The release record: desired spec declared by the user plus the status
//! observed by the controller.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CoreError, Result};
use crate::phase::Phase;

const MAX_NAMESPACE_LEN: usize = 63;
const MAX_NAME_LEN: usize = 253;

/// Identity of a release record, rendered as `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseKey {
    pub namespace: String,
    pub name: String,
}

impl ReleaseKey {
    /// Build a key, validating both components.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        validate_namespace(&namespace)?;
        validate_name(&name)?;
        Ok(Self { namespace, name })
    }

    /// Name of the deployed instance owned by this record.
    pub fn instance_name(&self) -> String {
        instance_name(&self.namespace, &self.name)
    }
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ReleaseKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), None) => Self::new(namespace, name)
                .map_err(|e| CoreError::invalid_key(s, e.to_string())),
            _ => Err(CoreError::invalid_key(s, "expected exactly one '/'")),
        }
    }
}

/// Deployed-instance name for `(namespace, name)`.
///
/// Dashes in the namespace are doubled before joining with a single dash.
/// Names never start with a dash and namespaces never end with one, so the
/// first lone dash is always the separator and distinct keys never collide.
pub fn instance_name(namespace: &str, name: &str) -> String {
    format!("{}-{}", namespace.replace('-', "--"), name)
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(CoreError::invalid_name(
            "namespace",
            namespace,
            format!("must be at most {MAX_NAMESPACE_LEN} characters"),
        ));
    }
    validate_dns_chars("namespace", namespace, false)
}

fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::invalid_name(
            "name",
            name,
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    validate_dns_chars("name", name, true)
}

fn validate_dns_chars(field: &'static str, value: &str, allow_dots: bool) -> Result<()> {
    let bytes = value.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return Err(CoreError::invalid_name(field, value, "must not be empty"));
    };
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(CoreError::invalid_name(
            field,
            value,
            "must start and end with an alphanumeric character",
        ));
    }
    let valid = bytes.iter().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || (allow_dots && *b == b'.')
    });
    if !valid {
        return Err(CoreError::invalid_name(
            field,
            value,
            "must consist of lowercase alphanumerics or '-'",
        ));
    }
    Ok(())
}

/// Storage-owned metadata of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Revision marker assigned by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the store only when the spec changes.
    #[serde(default)]
    pub generation: u64,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_timestamp: Option<OffsetDateTime>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            resource_version: 0,
            generation: 0,
            creation_timestamp: None,
        }
    }
}

/// Desired state of a release, as declared by the user.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Chart repository URL. The controller default applies when unset.
    #[serde(rename = "repoURL", default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    /// Chart name within the repository.
    #[serde(default)]
    pub chart_name: String,
    /// Chart version constraint. Empty means latest.
    #[serde(default)]
    pub version: String,
    /// Credentials for private repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Raw values document overriding the chart defaults.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values: String,
    /// Force resource updates through delete/recreate when needed.
    #[serde(default)]
    pub force: bool,
    /// Restart workloads during upgrade.
    #[serde(default)]
    pub recreate: bool,
    /// Paused releases are left alone except for deletion.
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl fmt::Debug for ReleaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseSpec")
            .field("repo_url", &self.repo_url)
            .field("chart_name", &self.chart_name)
            .field("version", &self.version)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("values_len", &self.values.len())
            .field("force", &self.force)
            .field("recreate", &self.recreate)
            .field("paused", &self.paused)
            .field("description", &self.description)
            .finish()
    }
}

/// Observed state, written only by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    /// Resolved download URL of the chart that was deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_url: Option<String>,
    #[serde(default)]
    pub phase: Phase,
    /// Revision number assigned by the deployment backend.
    #[serde(default)]
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ReleaseStatus {
    /// Status of a successful install or upgrade.
    pub fn ready(revision: u32, chart_url: impl Into<String>) -> Self {
        Self {
            chart_url: Some(chart_url.into()),
            phase: Phase::Ready,
            revision,
            failure_message: None,
        }
    }

    /// Terminal failure, keeping what is known about the last deployment.
    pub fn failed(previous: &ReleaseStatus, message: impl Into<String>) -> Self {
        Self {
            chart_url: previous.chart_url.clone(),
            phase: Phase::Failed,
            revision: previous.revision,
            failure_message: Some(message.into()),
        }
    }
}

/// A release record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub metadata: ObjectMeta,
    pub spec: ReleaseSpec,
    #[serde(default)]
    pub status: ReleaseStatus,
}

impl ReleaseRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ReleaseSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: ReleaseStatus::default(),
        }
    }

    /// Validated key of this record.
    pub fn key(&self) -> Result<ReleaseKey> {
        ReleaseKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// `namespace/name` without validation, for logging.
    pub fn display_key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn phase(&self) -> Phase {
        self.status.phase
    }

    pub fn resource_version(&self) -> u64 {
        self.metadata.resource_version
    }
}

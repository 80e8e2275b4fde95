//! JSON-over-HTTP deployment backend client.
//!
//! | Operation        | Request                                  |
//! |------------------|------------------------------------------|
//! | resolve_source   | `POST /v1/charts/resolve`                |
//! | download         | `POST /v1/charts/download`               |
//! | load_package     | `GET /v1/archives/{id}`                  |
//! | install          | `POST /v1/releases`                      |
//! | upgrade          | `PUT /v1/releases/{name}`                |
//! | uninstall        | `DELETE /v1/releases/{name}?purge=..`    |
//! | history          | `GET /v1/releases/{name}/history?max=..` |
//! | release_status   | `GET /v1/releases/{name}/status`         |
//! | ping             | `GET /v1/ping`                           |
//!
//! Transport failures and 5xx responses are `Unavailable`. A 404 on a
//! release endpoint is `NotFound`; other 4xx responses map to the error of
//! the failing step.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::BackendError;
use crate::traits::DeploymentBackend;
use crate::types::{
    ChartArchive, ChartLocator, Credentials, DeployedRelease, InstanceStatus, Operation, Package,
    UpgradeFlags,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest<'a> {
    #[serde(rename = "repoURL")]
    repo_url: &'a str,
    chart: &'a str,
    version: &'a str,
    #[serde(flatten)]
    credentials: &'a Credentials,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallRequest<'a> {
    name: &'a str,
    namespace: &'a str,
    package: &'a Package,
    values: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpgradeRequest<'a> {
    package: &'a Package,
    values: &'a str,
    force: bool,
    recreate: bool,
}

/// Deployment backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    /// Creates a client for the service at `target`.
    pub fn new(target: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let mut base = Url::parse(target).map_err(|e| {
            BackendError::unavailable(Operation::Ping, format!("invalid target {target:?}: {e}"))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::unavailable(Operation::Ping, e.to_string()))?;

        Ok(Self { client, base })
    }

    pub fn target(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, operation: Operation, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|e| BackendError::unavailable(operation, format!("invalid path {path}: {e}")))
    }

    /// Sends the request and separates transport errors, 5xx and 4xx.
    ///
    /// `client_error` turns a 4xx status and body into the step's error.
    async fn send(
        &self,
        operation: Operation,
        request: RequestBuilder,
        client_error: impl FnOnce(StatusCode, String) -> BackendError + Send,
    ) -> Result<Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::unavailable(operation, e.to_string()))?;

        let status = response.status();
        debug!(operation = %operation, status = status.as_u16(), "Backend response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        };
        if status.is_server_error() || Self::is_retry_later(status) {
            Err(BackendError::unavailable(operation, message))
        } else {
            Err(client_error(status, message))
        }
    }

    /// 4xx statuses that say "try again later" rather than "this request is wrong".
    fn is_retry_later(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY | StatusCode::TOO_MANY_REQUESTS
        )
    }

    async fn decode<T: DeserializeOwned>(
        operation: Operation,
        response: Response,
    ) -> Result<T, BackendError> {
        response.json::<T>().await.map_err(|e| {
            BackendError::unavailable(operation, format!("malformed response body: {e}"))
        })
    }

    /// 4xx handling shared by release endpoints.
    fn release_error(
        operation: Operation,
        instance: &str,
    ) -> impl FnOnce(StatusCode, String) -> BackendError + Send + use<> {
        let instance = instance.to_string();
        move |status, message| {
            if status == StatusCode::NOT_FOUND {
                BackendError::not_found(instance)
            } else {
                BackendError::rejected(operation, message)
            }
        }
    }
}

#[async_trait]
impl DeploymentBackend for HttpBackend {
    async fn resolve_source(
        &self,
        repo_url: &str,
        chart: &str,
        version: &str,
        credentials: &Credentials,
    ) -> Result<ChartLocator, BackendError> {
        let op = Operation::ResolveSource;
        let body = ResolveRequest {
            repo_url,
            chart,
            version,
            credentials,
        };
        let request = self
            .client
            .post(self.endpoint(op, "v1/charts/resolve")?)
            .json(&body);
        let response = self
            .send(op, request, |_, message| {
                BackendError::resolve(repo_url, chart, version, message)
            })
            .await?;
        Self::decode(op, response).await
    }

    async fn download(&self, locator: &ChartLocator) -> Result<ChartArchive, BackendError> {
        let op = Operation::Download;
        let request = self
            .client
            .post(self.endpoint(op, "v1/charts/download")?)
            .json(locator);
        let response = self
            .send(op, request, |_, message| {
                BackendError::download(&locator.url, message)
            })
            .await?;
        Self::decode(op, response).await
    }

    async fn load_package(&self, archive: &ChartArchive) -> Result<Package, BackendError> {
        let op = Operation::LoadPackage;
        let request = self
            .client
            .get(self.endpoint(op, &format!("v1/archives/{}", archive.id))?);
        let response = self
            .send(op, request, |_, message| BackendError::invalid_package(message))
            .await?;
        Self::decode(op, response).await
    }

    async fn install(
        &self,
        package: &Package,
        namespace: &str,
        values: &str,
        instance: &str,
    ) -> Result<DeployedRelease, BackendError> {
        let op = Operation::Install;
        let body = InstallRequest {
            name: instance,
            namespace,
            package,
            values,
        };
        let request = self
            .client
            .post(self.endpoint(op, "v1/releases")?)
            .json(&body);
        let response = self
            .send(op, request, |_, message| BackendError::rejected(op, message))
            .await?;
        Self::decode(op, response).await
    }

    async fn upgrade(
        &self,
        instance: &str,
        package: &Package,
        values: &str,
        flags: UpgradeFlags,
    ) -> Result<DeployedRelease, BackendError> {
        let op = Operation::Upgrade;
        let body = UpgradeRequest {
            package,
            values,
            force: flags.force,
            recreate: flags.recreate,
        };
        let request = self
            .client
            .put(self.endpoint(op, &format!("v1/releases/{instance}"))?)
            .json(&body);
        let response = self
            .send(op, request, Self::release_error(op, instance))
            .await?;
        Self::decode(op, response).await
    }

    async fn uninstall(&self, instance: &str, purge: bool) -> Result<(), BackendError> {
        let op = Operation::Uninstall;
        let request = self
            .client
            .delete(self.endpoint(op, &format!("v1/releases/{instance}"))?)
            .query(&[("purge", purge)]);
        self.send(op, request, Self::release_error(op, instance))
            .await
            .map(|_| ())
    }

    async fn history(
        &self,
        instance: &str,
        limit: usize,
    ) -> Result<Vec<DeployedRelease>, BackendError> {
        let op = Operation::History;
        let request = self
            .client
            .get(self.endpoint(op, &format!("v1/releases/{instance}/history"))?)
            .query(&[("max", limit)]);
        let response = self
            .send(op, request, Self::release_error(op, instance))
            .await?;
        Self::decode(op, response).await
    }

    async fn release_status(&self, instance: &str) -> Result<InstanceStatus, BackendError> {
        let op = Operation::ReleaseStatus;
        let request = self
            .client
            .get(self.endpoint(op, &format!("v1/releases/{instance}/status"))?);
        let response = self
            .send(op, request, Self::release_error(op, instance))
            .await?;
        Self::decode(op, response).await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let op = Operation::Ping;
        let request = self.client.get(self.endpoint(op, "v1/ping")?);
        self.send(op, request, |_, message| BackendError::unavailable(op, message))
            .await
            .map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

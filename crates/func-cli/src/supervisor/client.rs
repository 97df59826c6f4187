use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{discovery::Candidate, identity::STATUS_PATH};
use crate::error::CoreError;

/// Body of `GET /admin/host/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    #[serde(default, alias = "Id")]
    pub id: String,
    #[serde(default, alias = "State")]
    pub state: String,
    #[serde(default, alias = "Version")]
    pub version: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub process_uptime: u64,
    #[serde(default, alias = "Errors")]
    pub errors: Vec<String>,
}

/// Body of `POST /admin/functions/{name}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionInvocation {
    #[serde(default)]
    pub input: String,
}

/// Bound on each request once connected, unless the caller picks another.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client bound to a live host that serves the current app.
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    http: reqwest::Client,
    candidate: Candidate,
    timeout: Duration,
}

impl ConnectedClient {
    pub fn new(http: reqwest::Client, candidate: Candidate) -> Self {
        Self { http, candidate, timeout: DEFAULT_REQUEST_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_uri(&self) -> String {
        self.candidate.base_uri()
    }

    pub fn port(&self) -> u16 {
        self.candidate.port()
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response, CoreError> {
        let uri = self.candidate.endpoint(path);
        self.http
            .get(&uri)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| CoreError::HostRequest { uri, source })
    }

    pub async fn host_status(&self) -> Result<HostStatus, CoreError> {
        let uri = self.candidate.endpoint(STATUS_PATH);
        let response = self.get(STATUS_PATH).await?;
        response
            .error_for_status()
            .map_err(|source| CoreError::HostRequest { uri: uri.clone(), source })?
            .json::<HostStatus>()
            .await
            .map_err(|source| CoreError::HostRequest { uri, source })
    }

    pub async fn function_status(&self, name: &str) -> Result<reqwest::Response, CoreError> {
        self.get(&format!("admin/functions/{name}/status")).await
    }

    /// Queue an invocation through the admin endpoint.
    pub async fn invoke(&self, name: &str, input: &str) -> Result<reqwest::Response, CoreError> {
        let uri = self.candidate.endpoint(&format!("admin/functions/{name}"));
        let body = FunctionInvocation { input: input.to_string() };
        self.http
            .post(&uri)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|source| CoreError::HostRequest { uri, source })
    }
}

/// Shared HTTP client for probes and host requests.
pub fn build_http_client() -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .map_err(|source| CoreError::HttpClientInit { source })
}

use std::{future::Future, time::Duration};

use tracing::debug;

use super::{client::HostStatus, discovery::Candidate, probe::DEFAULT_PROBE_TIMEOUT};
use crate::project::{FunctionApp, HostIdentity};

/// Status endpoint reporting the id of the app a host serves.
pub const STATUS_PATH: &str = "admin/host/status";

/// How an unverifiable remote identity compares against the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// Unavailable remote identity counts as a match.
    FailOpen,
    /// Unavailable remote identity counts as a mismatch.
    FailClosed,
}

/// Policy used by discovery. A down-level or unresponsive status endpoint
/// must not block discovery, so unverifiable hosts are accepted.
pub const UNVERIFIED_IDENTITY_POLICY: IdentityPolicy = IdentityPolicy::FailOpen;

/// Result of asking a live host which app it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteIdentity {
    Reported(HostIdentity),
    /// Network failure, error status, unparseable body or missing `id`.
    Unavailable,
}

impl IdentityPolicy {
    pub fn accepts(self, local: &HostIdentity, remote: &RemoteIdentity) -> bool {
        match remote {
            RemoteIdentity::Reported(remote) => remote == local,
            RemoteIdentity::Unavailable => matches!(self, IdentityPolicy::FailOpen),
        }
    }
}

/// Source of the local and remote host identities compared during discovery.
pub trait IdentitySource {
    /// `None` when the project declares no id; any live host then matches.
    fn local_identity(&self) -> Option<HostIdentity>;

    fn remote_identity(&self, candidate: &Candidate) -> impl Future<Output = RemoteIdentity> + Send;
}

/// Reads `host.json` locally and `GET /admin/host/status` remotely.
#[derive(Debug, Clone)]
pub struct HttpIdentitySource {
    app: FunctionApp,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpIdentitySource {
    pub fn new(app: FunctionApp, client: reqwest::Client) -> Self {
        Self { app, client, timeout: DEFAULT_PROBE_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_status(&self, uri: &str) -> Result<HostStatus, reqwest::Error> {
        self.client
            .get(uri)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<HostStatus>()
            .await
    }
}

impl IdentitySource for HttpIdentitySource {
    fn local_identity(&self) -> Option<HostIdentity> {
        self.app.local_identity()
    }

    async fn remote_identity(&self, candidate: &Candidate) -> RemoteIdentity {
        let uri = candidate.endpoint(STATUS_PATH);
        match self.fetch_status(&uri).await {
            Ok(status) => match HostIdentity::new(status.id) {
                Some(identity) => RemoteIdentity::Reported(identity),
                None => {
                    debug!(%uri, "host status carries no id");
                    RemoteIdentity::Unavailable
                }
            },
            Err(err) => {
                debug!(%uri, error = %err, "failed to read host status");
                RemoteIdentity::Unavailable
            }
        }
    }
}

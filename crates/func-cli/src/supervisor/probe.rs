use std::{future::Future, time::Duration};

use tracing::debug;

use super::discovery::Candidate;

/// Liveness endpoint served by every host.
pub const PING_PATH: &str = "admin/host/ping";
/// Per-attempt bound so an unreachable candidate never stalls discovery.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Reports whether a candidate host is up. Implementations never fail:
/// anything short of a successful response means "not alive".
pub trait LivenessProbe {
    fn is_alive(&self, candidate: &Candidate) -> impl Future<Output = bool> + Send;
}

/// Probe backed by `GET /admin/host/ping`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, timeout: DEFAULT_PROBE_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl LivenessProbe for HttpProbe {
    async fn is_alive(&self, candidate: &Candidate) -> bool {
        let uri = candidate.endpoint(PING_PATH);
        match self.client.get(&uri).timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(%uri, status = status.as_u16(), "host ping answered");
                status.is_success()
            }
            Err(err) => {
                debug!(%uri, error = %err, "host ping failed");
                false
            }
        }
    }
}

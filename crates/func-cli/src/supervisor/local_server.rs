use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use super::{
    client::ConnectedClient,
    discovery::{Candidate, Discovered, Discovery},
    identity::IdentitySource,
    launcher::HostLauncher,
    probe::LivenessProbe,
    process_manager::ProcessManager,
};
use crate::error::CoreError;

pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Finds or starts the host for the current app and waits until it answers.
pub struct LocalServer<P, I, L> {
    discovery: Discovery<P, I, L>,
    fixed_port: Option<u16>,
    processes: Arc<ProcessManager>,
    http: reqwest::Client,
}

impl<P, I, L> LocalServer<P, I, L>
where
    P: LivenessProbe,
    I: IdentitySource,
    L: HostLauncher,
{
    pub fn new(
        discovery: Discovery<P, I, L>,
        processes: Arc<ProcessManager>,
        http: reqwest::Client,
    ) -> Self {
        Self { discovery, fixed_port: None, processes, http }
    }

    /// Skip discovery and talk to this port only (`Host.LocalHttpPort`).
    pub fn with_fixed_port(mut self, port: Option<u16>) -> Self {
        self.fixed_port = port;
        self
    }

    /// `timeout` bounds the wait for the host and then every request made
    /// through the returned client.
    pub async fn connect(&self, timeout: Duration) -> Result<ConnectedClient, CoreError> {
        let candidate = match self.fixed_port {
            Some(port) => {
                debug!(port, "using configured local http port");
                Candidate::localhost(port)
            }
            None => match self.discovery.discover().await? {
                Discovered::Reused(candidate) => candidate,
                Discovered::Launched { candidate, host } => {
                    self.processes.track(host);
                    candidate
                }
            },
        };

        self.wait_until_alive(&candidate, timeout).await?;
        info!(uri = %candidate.base_uri(), "connected to host");
        Ok(ConnectedClient::new(self.http.clone(), candidate).with_timeout(timeout))
    }

    async fn wait_until_alive(
        &self,
        candidate: &Candidate,
        timeout: Duration,
    ) -> Result<(), CoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.discovery.probe().is_alive(candidate).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CoreError::HostNotReachable { uri: candidate.base_uri(), timeout });
            }
            sleep(CONNECT_POLL_INTERVAL).await;
        }
    }
}

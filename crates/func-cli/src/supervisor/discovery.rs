use tracing::{debug, info};

use super::{
    identity::{IdentityPolicy, IdentitySource, UNVERIFIED_IDENTITY_POLICY},
    launcher::{HostLauncher, LaunchedHost},
    probe::LivenessProbe,
};
use crate::error::CoreError;

pub const DEFAULT_BASE_PORT: u16 = 7071;
pub const DEFAULT_MAX_ATTEMPTS: usize = 50;

const LOCALHOST: &str = "localhost";

/// A host address tried during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    host: String,
    port: u16,
}

impl Candidate {
    pub fn localhost(port: u16) -> Self {
        Self { host: LOCALHOST.to_string(), port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_uri(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_uri(), path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub base_port: u16,
    pub max_attempts: usize,
    pub identity_policy: IdentityPolicy,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            identity_policy: UNVERIFIED_IDENTITY_POLICY,
        }
    }
}

/// Outcome of a discovery pass.
#[derive(Debug)]
pub enum Discovered {
    /// A live host already serving this app.
    Reused(Candidate),
    /// A free port where a new host was just started. It may not be up yet.
    Launched { candidate: Candidate, host: LaunchedHost },
}

impl Discovered {
    pub fn candidate(&self) -> &Candidate {
        match self {
            Discovered::Reused(candidate) | Discovered::Launched { candidate, .. } => candidate,
        }
    }

    pub fn was_launched(&self) -> bool {
        matches!(self, Discovered::Launched { .. })
    }
}

/// Walks ports upward from the base port until it finds a host serving the
/// current app or a free port to launch one on.
#[derive(Debug)]
pub struct Discovery<P, I, L> {
    probe: P,
    identity: I,
    launcher: L,
    options: DiscoveryOptions,
}

impl<P, I, L> Discovery<P, I, L>
where
    P: LivenessProbe,
    I: IdentitySource,
    L: HostLauncher,
{
    pub fn new(probe: P, identity: I, launcher: L, options: DiscoveryOptions) -> Self {
        Self { probe, identity, launcher, options }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub async fn discover(&self) -> Result<Discovered, CoreError> {
        let DiscoveryOptions { base_port, max_attempts, identity_policy } = self.options;
        let local = self.identity.local_identity();
        debug!(base_port, max_attempts, local = ?local, "starting host discovery");

        let mut rejected = Vec::new();
        let mut attempts = 0;
        for offset in 0..max_attempts {
            let Some(port) = u16::try_from(offset).ok().and_then(|o| base_port.checked_add(o))
            else {
                break;
            };
            attempts += 1;
            let candidate = Candidate::localhost(port);

            if !self.probe.is_alive(&candidate).await {
                debug!(port, "no live host, launching");
                let host = self.launcher.launch(port).await?;
                return Ok(Discovered::Launched { candidate, host });
            }

            let Some(local) = local.as_ref() else {
                info!(port, "reusing live host");
                return Ok(Discovered::Reused(candidate));
            };

            let remote = self.identity.remote_identity(&candidate).await;
            if identity_policy.accepts(local, &remote) {
                info!(port, "reusing live host serving this app");
                return Ok(Discovered::Reused(candidate));
            }
            debug!(port, remote = ?remote, "live host serves a different app");
            rejected.push(port);
        }

        Err(CoreError::DiscoveryExhausted { base_port, attempts, rejected_ports: rejected })
    }
}

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use func_cli::{
    CoreError, HostIdentity,
    supervisor::{
        Candidate, Discovered, Discovery, DiscoveryOptions, HostLauncher, IdentityPolicy,
        IdentitySource, LaunchedHost, LivenessProbe, LocalServer, ProcessManager, RemoteIdentity,
        client::build_http_client,
    },
};
use tokio::time::Instant;

type Log = Arc<Mutex<Vec<u16>>>;

fn entries(log: &Log) -> Vec<u16> {
    log.lock().unwrap().clone()
}

struct FakeProbe {
    alive: HashSet<u16>,
    probes: Log,
}

impl FakeProbe {
    fn alive_on(ports: impl IntoIterator<Item = u16>) -> Self {
        Self { alive: ports.into_iter().collect(), probes: Log::default() }
    }
}

impl LivenessProbe for FakeProbe {
    async fn is_alive(&self, candidate: &Candidate) -> bool {
        self.probes.lock().unwrap().push(candidate.port());
        self.alive.contains(&candidate.port())
    }
}

/// Alive on every port once the deadline has passed.
struct DelayedProbe {
    alive_at: Instant,
    probes: Log,
}

impl LivenessProbe for DelayedProbe {
    async fn is_alive(&self, candidate: &Candidate) -> bool {
        self.probes.lock().unwrap().push(candidate.port());
        Instant::now() >= self.alive_at
    }
}

struct FakeIdentity {
    local: Option<HostIdentity>,
    remote: HashMap<u16, RemoteIdentity>,
    lookups: Log,
}

impl FakeIdentity {
    fn none() -> Self {
        Self { local: None, remote: HashMap::new(), lookups: Log::default() }
    }

    fn local(id: &str) -> Self {
        Self { local: HostIdentity::new(id), remote: HashMap::new(), lookups: Log::default() }
    }

    fn serving(mut self, port: u16, id: &str) -> Self {
        let identity = HostIdentity::new(id).expect("non-blank id");
        self.remote.insert(port, RemoteIdentity::Reported(identity));
        self
    }
}

impl IdentitySource for FakeIdentity {
    fn local_identity(&self) -> Option<HostIdentity> {
        self.local.clone()
    }

    async fn remote_identity(&self, candidate: &Candidate) -> RemoteIdentity {
        self.lookups.lock().unwrap().push(candidate.port());
        self.remote.get(&candidate.port()).cloned().unwrap_or(RemoteIdentity::Unavailable)
    }
}

#[derive(Default)]
struct FakeLauncher {
    launched: Log,
}

impl HostLauncher for FakeLauncher {
    async fn launch(&self, port: u16) -> Result<LaunchedHost, CoreError> {
        self.launched.lock().unwrap().push(port);
        Ok(LaunchedHost::external(port))
    }
}

fn options(max_attempts: usize) -> DiscoveryOptions {
    DiscoveryOptions { max_attempts, ..DiscoveryOptions::default() }
}

#[tokio::test]
async fn no_local_identity_reuses_first_live_host_without_lookup() {
    let probe = FakeProbe::alive_on([7071]);
    let probes = probe.probes.clone();
    let identity = FakeIdentity::none().serving(7071, "someone-else");
    let lookups = identity.lookups.clone();
    let launcher = FakeLauncher::default();
    let launched = launcher.launched.clone();

    let discovery = Discovery::new(probe, identity, launcher, DiscoveryOptions::default());
    let found = discovery.discover().await.unwrap();

    assert!(matches!(&found, Discovered::Reused(candidate) if candidate.port() == 7071));
    assert_eq!(entries(&probes), vec![7071]);
    assert!(entries(&lookups).is_empty());
    assert!(entries(&launched).is_empty());
}

#[tokio::test]
async fn mismatched_host_moves_discovery_to_next_port() {
    let probe = FakeProbe::alive_on([7071, 7072]);
    let probes = probe.probes.clone();
    let identity = FakeIdentity::local("my-app").serving(7071, "other-app").serving(7072, "MY-APP");

    let discovery =
        Discovery::new(probe, identity, FakeLauncher::default(), DiscoveryOptions::default());
    let found = discovery.discover().await.unwrap();

    assert_eq!(found.candidate().port(), 7072);
    assert!(!found.was_launched());
    assert_eq!(entries(&probes), vec![7071, 7072]);
}

#[tokio::test]
async fn free_port_after_mismatch_launches_host_there() {
    let probe = FakeProbe::alive_on([7071]);
    let identity = FakeIdentity::local("my-app").serving(7071, "other-app");
    let launcher = FakeLauncher::default();
    let launched = launcher.launched.clone();

    let discovery = Discovery::new(probe, identity, launcher, DiscoveryOptions::default());
    let found = discovery.discover().await.unwrap();

    assert!(found.was_launched());
    assert_eq!(found.candidate().port(), 7072);
    assert_eq!(entries(&launched), vec![7072]);
}

#[tokio::test]
async fn discovery_gives_up_after_max_attempts() {
    let ports = 7071..7131;
    let probe = FakeProbe::alive_on(ports.clone());
    let probes = probe.probes.clone();
    let identity =
        ports.fold(FakeIdentity::local("my-app"), |identity, port| identity.serving(port, "other"));
    let launcher = FakeLauncher::default();
    let launched = launcher.launched.clone();

    let discovery = Discovery::new(probe, identity, launcher, options(50));
    let err = discovery.discover().await.unwrap_err();

    match err {
        CoreError::DiscoveryExhausted { base_port, attempts, rejected_ports } => {
            assert_eq!(base_port, 7071);
            assert_eq!(attempts, 50);
            assert_eq!(rejected_ports.len(), 50);
            assert_eq!(rejected_ports.first(), Some(&7071));
            assert_eq!(rejected_ports.last(), Some(&7120));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(entries(&probes).len(), 50);
    assert!(entries(&launched).is_empty());
}

#[tokio::test]
async fn unavailable_remote_identity_follows_policy() {
    let discovery = Discovery::new(
        FakeProbe::alive_on([7071]),
        FakeIdentity::local("my-app"),
        FakeLauncher::default(),
        DiscoveryOptions::default(),
    );
    let found = discovery.discover().await.unwrap();
    assert!(matches!(found, Discovered::Reused(ref candidate) if candidate.port() == 7071));

    let closed = DiscoveryOptions {
        identity_policy: IdentityPolicy::FailClosed,
        ..DiscoveryOptions::default()
    };
    let discovery = Discovery::new(
        FakeProbe::alive_on([7071]),
        FakeIdentity::local("my-app"),
        FakeLauncher::default(),
        closed,
    );
    let found = discovery.discover().await.unwrap();
    assert!(found.was_launched());
    assert_eq!(found.candidate().port(), 7072);
}

#[tokio::test]
async fn port_overflow_counts_as_exhaustion() {
    let discovery = Discovery::new(
        FakeProbe::alive_on([65534, 65535]),
        FakeIdentity::local("my-app").serving(65534, "a").serving(65535, "b"),
        FakeLauncher::default(),
        DiscoveryOptions { base_port: 65534, ..DiscoveryOptions::default() },
    );
    let err = discovery.discover().await.unwrap_err();
    match err {
        CoreError::DiscoveryExhausted { attempts, rejected_ports, .. } => {
            assert_eq!(attempts, 2);
            assert_eq!(rejected_ports, vec![65534, 65535]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn launched_host_is_awaited_until_it_answers() {
    let started = Instant::now();
    let probe = DelayedProbe { alive_at: started + Duration::from_secs(2), probes: Log::default() };
    let launcher = FakeLauncher::default();
    let launched = launcher.launched.clone();
    let discovery =
        Discovery::new(probe, FakeIdentity::none(), launcher, DiscoveryOptions::default());

    let server = LocalServer::new(
        discovery,
        Arc::new(ProcessManager::new()),
        build_http_client().unwrap(),
    );
    let client = server.connect(Duration::from_secs(5)).await.unwrap();

    assert_eq!(client.port(), 7071);
    assert_eq!(entries(&launched), vec![7071]);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "connected too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "connected too late: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn unresponsive_host_times_out() {
    let probe = FakeProbe::alive_on(std::iter::empty());
    let discovery = Discovery::new(
        probe,
        FakeIdentity::none(),
        FakeLauncher::default(),
        DiscoveryOptions::default(),
    );
    let server = LocalServer::new(
        discovery,
        Arc::new(ProcessManager::new()),
        build_http_client().unwrap(),
    );

    let err = server.connect(Duration::from_secs(1)).await.unwrap_err();
    match err {
        CoreError::HostNotReachable { uri, timeout } => {
            assert_eq!(uri, "http://localhost:7071/");
            assert_eq!(timeout, Duration::from_secs(1));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn fixed_port_skips_discovery() {
    let probe = FakeProbe::alive_on([7090]);
    let probes = probe.probes.clone();
    let launcher = FakeLauncher::default();
    let launched = launcher.launched.clone();
    let discovery =
        Discovery::new(probe, FakeIdentity::none(), launcher, DiscoveryOptions::default());

    let server = LocalServer::new(
        discovery,
        Arc::new(ProcessManager::new()),
        build_http_client().unwrap(),
    )
    .with_fixed_port(Some(7090));
    let client = server.connect(Duration::from_secs(1)).await.unwrap();

    assert_eq!(client.port(), 7090);
    assert_eq!(client.timeout(), Duration::from_secs(1));
    assert_eq!(entries(&probes), vec![7090]);
    assert!(entries(&launched).is_empty());
}

//! Core of the `func` command line tool: local host discovery, launch and shutdown.

pub mod config;
pub mod console;
pub mod error;
pub mod paths;
pub mod project;

pub use config::PersistentSettings;
pub use error::CoreError;
pub use paths::{Layout, default_root};
pub use project::{FunctionApp, HostIdentity};

// CLI helpers
#[path = "cli/messages.rs"]
pub mod cli_messages;

// Supervisor: discovery, launch, shutdown
pub mod supervisor {
    pub mod client;
    pub mod discovery;
    pub mod identity;
    pub mod launcher;
    pub mod local_server;
    pub mod probe;
    pub mod process_manager;
    pub mod shutdown;

    pub use client::ConnectedClient;
    pub use discovery::{Candidate, Discovered, Discovery, DiscoveryOptions};
    pub use identity::{
        HttpIdentitySource, IdentityPolicy, IdentitySource, RemoteIdentity,
        UNVERIFIED_IDENTITY_POLICY,
    };
    pub use launcher::{HostLauncher, LaunchedHost, ProcessLauncher};
    pub use local_server::LocalServer;
    pub use probe::{HttpProbe, LivenessProbe};
    pub use process_manager::{ProcessKiller, ProcessManager};
    pub use shutdown::{ShutdownCoordinator, ShutdownState};
}

// Local host admin server
pub mod host {
    pub mod server;

    // Start command (host entry point)
    pub mod start;
}

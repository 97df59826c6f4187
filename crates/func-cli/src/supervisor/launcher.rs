use std::{
    env,
    ffi::OsString,
    fs::OpenOptions,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Child, Command as StdCommand, Stdio},
};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::{Layout, PersistentSettings, cli_messages, console, error::CoreError};

/// Environment variable pointing at the host executable.
pub const HOST_EXECUTABLE_ENV: &str = "FUNC_CLI_HOST_EXECUTABLE";
const FALLBACK_EXECUTABLE: &str = "func";

/// Starts a host bound to a port. The caller does not wait on the process.
pub trait HostLauncher {
    fn launch(&self, port: u16) -> impl Future<Output = Result<LaunchedHost, CoreError>> + Send;
}

/// Handle to a host started by a [`HostLauncher`].
#[derive(Debug)]
pub struct LaunchedHost {
    port: u16,
    child: Option<Child>,
}

impl LaunchedHost {
    pub fn from_child(port: u16, child: Child) -> Self {
        Self { port, child: Some(child) }
    }

    /// A host started outside this process (for example by another supervisor);
    /// there is nothing to track or kill.
    pub fn external(port: u16) -> Self {
        Self { port, child: None }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn into_child(self) -> Option<Child> {
        self.child
    }
}

/// Launches `{exe} host start -p {port} --pause-on-error` as a detached process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
    startup_log: Option<PathBuf>,
    notice_layout: Option<Layout>,
}

impl ProcessLauncher {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable, startup_log: None, notice_layout: None }
    }

    /// Append the host's stderr to this file instead of discarding it.
    pub fn with_startup_log(mut self, path: PathBuf) -> Self {
        self.startup_log = Some(path);
        self
    }

    /// Show the launch notice (and remember the user's answer) under this layout.
    pub fn with_launch_notice(mut self, layout: Layout) -> Self {
        self.notice_layout = Some(layout);
        self
    }

    fn stderr_target(&self) -> Stdio {
        let Some(path) = self.startup_log.as_ref() else {
            return Stdio::null();
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Stdio::from(file),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to open host startup log");
                Stdio::null()
            }
        }
    }

    // Reads through tokio so an interrupt can drop the pending prompt.
    async fn confirm_launch_notice(&self) {
        let Some(layout) = self.notice_layout.as_ref() else {
            return;
        };
        let mut settings = match PersistentSettings::load(layout) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = ?err, "failed to load settings, skipping launch notice");
                return;
            }
        };
        if !settings.display_launching_run_server_warning {
            return;
        }

        let messages = cli_messages::messages();
        console::line("");
        for line in messages.launch_notice() {
            console::line(line);
        }
        let mut stdin = BufReader::new(tokio::io::stdin());
        let keep_showing = loop {
            console::prompt(messages.launch_notice_prompt());
            let mut input = String::new();
            match stdin.read_line(&mut input).await {
                Ok(0) | Err(_) => break true,
                Ok(_) => {}
            }
            match input.trim().to_ascii_lowercase().as_str() {
                "" | "yes" => break true,
                "no" => break false,
                _ => continue,
            }
        };

        if !keep_showing {
            settings.display_launching_run_server_warning = false;
            if let Err(err) = settings.store(layout) {
                warn!(error = ?err, "failed to persist launch notice preference");
            }
        }
    }
}

impl HostLauncher for ProcessLauncher {
    async fn launch(&self, port: u16) -> Result<LaunchedHost, CoreError> {
        self.confirm_launch_notice().await;

        let path = self.executable.clone();
        if is_explicit_path(&path) && !path.exists() {
            return Err(CoreError::HostExecutableNotFound { path });
        }

        let mut command = build_host_command(&path, port);
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(self.stderr_target());
        configure_detached_process(&mut command);

        let child = command.spawn().map_err(|source| match source.kind() {
            ErrorKind::NotFound => CoreError::HostExecutableNotFound { path: path.clone() },
            _ => CoreError::HostLaunchFailed { path: path.clone(), source },
        })?;
        info!(pid = child.id(), port, path = %path.display(), "launched local host");

        Ok(LaunchedHost::from_child(port, child))
    }
}

/// Pick the host executable: explicit flag, then `FUNC_CLI_HOST_EXECUTABLE`,
/// then the running executable, then `func` from `PATH`.
pub fn resolve_host_executable(explicit: Option<PathBuf>) -> PathBuf {
    let resolved = explicit
        .or_else(|| {
            env::var_os(HOST_EXECUTABLE_ENV).filter(|value| !value.is_empty()).map(PathBuf::from)
        })
        .or_else(|| env::current_exe().ok())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_EXECUTABLE));
    debug!(path = %resolved.display(), "resolved host executable");
    resolved
}

/// Arguments passed to the host executable.
pub fn host_arguments(port: u16) -> Vec<OsString> {
    let port = port.to_string();
    ["host", "start", "-p", port.as_str(), "--pause-on-error"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// On Windows the host runs through `cmd /C` so it shares the console.
#[cfg(windows)]
pub fn build_host_command(executable: &Path, port: u16) -> StdCommand {
    let mut command = StdCommand::new("cmd");
    command.arg("/C").arg(executable).args(host_arguments(port));
    command
}

#[cfg(not(windows))]
pub fn build_host_command(executable: &Path, port: u16) -> StdCommand {
    let mut command = StdCommand::new(executable);
    command.args(host_arguments(port));
    command
}

fn is_explicit_path(path: &Path) -> bool {
    path.is_absolute() || path.components().count() > 1
}

// New session: the terminal's Ctrl+C must not reach the host directly.
#[cfg(unix)]
fn configure_detached_process(command: &mut StdCommand) {
    use std::os::unix::process::CommandExt;

    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn configure_detached_process(_command: &mut StdCommand) {}

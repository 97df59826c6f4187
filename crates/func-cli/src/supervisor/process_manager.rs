use std::{
    io,
    process::{self, Child},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, info, warn};

use super::launcher::LaunchedHost;

/// Terminates child processes on shutdown.
pub trait ProcessKiller: Send + Sync {
    fn kill_child_processes(&self);
}

/// Set of host processes launched by this invocation.
#[derive(Debug, Default)]
pub struct ProcessManager {
    children: Mutex<Vec<LaunchedHost>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a launched host so it is killed on shutdown.
    pub fn track(&self, host: LaunchedHost) {
        let Some(pid) = host.pid() else {
            debug!(port = host.port(), "launched host has no local process, not tracking");
            return;
        };
        debug!(pid, port = host.port(), "tracking host process");
        self.children.lock().unwrap_or_else(PoisonError::into_inner).push(host);
    }

    pub fn tracked_count(&self) -> usize {
        self.children.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Kill tracked children, then exit the current process.
    pub fn kill_main_process(&self, exit_code: i32) -> ! {
        self.kill_child_processes();
        warn!(exit_code, "terminating");
        process::exit(exit_code)
    }
}

impl ProcessKiller for ProcessManager {
    fn kill_child_processes(&self) {
        let children =
            std::mem::take(&mut *self.children.lock().unwrap_or_else(PoisonError::into_inner));
        for host in children {
            let port = host.port();
            let Some(mut child) = host.into_child() else {
                continue;
            };
            let pid = child.id();
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid, port, %status, "host process already exited");
                }
                Ok(None) => match terminate(&mut child) {
                    Ok(()) => {
                        let _ = child.wait();
                        info!(pid, port, "killed host process");
                    }
                    Err(err) => warn!(pid, port, error = %err, "failed to kill host process"),
                },
                Err(err) => warn!(pid, port, error = %err, "failed to query host process"),
            }
        }
    }
}

/// Kill the host together with anything it started. On Windows the tracked
/// child is the `cmd /C` wrapper, so the whole tree goes through `taskkill /T`.
#[cfg(windows)]
fn terminate(child: &mut Child) -> io::Result<()> {
    use std::process::Stdio;

    let pid = child.id();
    match tree_kill_command(pid).stdout(Stdio::null()).stderr(Stdio::null()).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            debug!(pid, %status, "taskkill failed, killing wrapper only");
            child.kill()
        }
        Err(err) => {
            debug!(pid, error = %err, "taskkill unavailable, killing wrapper only");
            child.kill()
        }
    }
}

#[cfg(not(windows))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

#[cfg(windows)]
fn tree_kill_command(pid: u32) -> process::Command {
    let mut command = process::Command::new("taskkill");
    command.args(["/T", "/F", "/PID"]).arg(pid.to_string());
    command
}

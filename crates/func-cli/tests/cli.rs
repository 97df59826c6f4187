use std::{fs, net::TcpListener};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn unused_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn func() -> Command {
    let mut cmd = Command::cargo_bin("func").expect("binary exists");
    cmd.env_remove("FUNC_CLI_HOST_EXECUTABLE");
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn missing_host_executable_is_reported() {
    let root = tempdir().unwrap();
    let app = tempdir().unwrap();
    let port = unused_port().to_string();

    func()
        .current_dir(app.path())
        .args(["--root", root.path().to_str().unwrap()])
        .args(["host", "status", "--port", &port, "--no-interactive"])
        .args(["--host-executable", "/nonexistent/func", "--timeout", "1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("not found"))
        .stderr(predicate::str::contains("--host-executable"));
}

#[test]
fn run_requires_function_name() {
    func().args(["run"]).assert().failure().stderr(predicate::str::contains("FUNCTION"));
}

#[test]
fn run_rejects_content_and_file_together() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("input.txt");
    fs::write(&input, "hi").unwrap();
    func()
        .args(["run", "HttpTrigger", "-c", "hello", "-f", input.to_str().unwrap()])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn help_lists_commands_with_resolved_text() {
    func()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("host"))
        .stdout(predicate::str::contains("Invoke a function through the local host."))
        .stdout(predicate::str::contains("i18n:").not());
}

#[test]
fn host_start_fails_on_busy_port_without_pausing() {
    let root = tempdir().unwrap();
    let app = tempdir().unwrap();
    fs::write(app.path().join("host.json"), r#"{"id": "busy"}"#).unwrap();
    let busy = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = busy.local_addr().unwrap().port().to_string();

    func()
        .args(["--root", root.path().to_str().unwrap()])
        .args(["host", "start", "-p", &port, "--pause-on-error"])
        .arg("--script-root")
        .arg(app.path())
        .write_stdin("\n")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to bind host"));

    assert!(root.path().join("logs/host").is_dir());
}

#[cfg(unix)]
#[test]
fn ctrl_c_at_launch_notice_exits_with_interrupt_code() {
    use std::{
        io::Read,
        process::{Command as StdCommand, Stdio},
        sync::mpsc,
        thread,
        time::{Duration, Instant},
    };

    let root = tempdir().unwrap();
    let app = tempdir().unwrap();
    let port = unused_port().to_string();
    let mut child = StdCommand::new(env!("CARGO_BIN_EXE_func"))
        .current_dir(app.path())
        .env_remove("FUNC_CLI_HOST_EXECUTABLE")
        .env("RUST_LOG", "off")
        .args(["--root", root.path().to_str().unwrap()])
        .args(["host", "status", "--port", &port, "--timeout", "30"])
        .args(["--host-executable", "/nonexistent/func"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    // Held open so the prompt never sees end of input.
    let _stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let (prompted_tx, prompted) = mpsc::channel();
    thread::spawn(move || {
        let mut seen = Vec::new();
        let mut buf = [0u8; 256];
        let mut notified = false;
        while let Ok(read) = stdout.read(&mut buf) {
            if read == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..read]);
            if !notified && String::from_utf8_lossy(&seen).contains("[yes/no]") {
                notified = true;
                let _ = prompted_tx.send(());
            }
        }
    });
    if prompted.recv_timeout(Duration::from_secs(10)).is_err() {
        let _ = child.kill();
        panic!("launch notice was not shown");
    }

    let pid = libc::pid_t::try_from(child.id()).unwrap();
    assert_eq!(unsafe { libc::kill(pid, libc::SIGINT) }, 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("func still running after Ctrl+C");
        }
        thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(130));
}

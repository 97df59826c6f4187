//! Serialized console output.
//!
//! Shutdown messages are printed from the interrupt task while a command may
//! still be writing, so every write goes through one lock.

use std::{
    fmt::Display,
    io::{self, Write},
    sync::Mutex,
};

static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Print a line to stdout.
pub fn line(message: impl Display) {
    let _guard = WRITE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{message}");
    let _ = stdout.flush();
}

/// Print a line to stderr.
pub fn error_line(message: impl Display) {
    let _guard = WRITE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{message}");
}

/// Print without a trailing newline (used for prompts).
pub fn prompt(message: impl Display) {
    let _guard = WRITE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut stdout = io::stdout().lock();
    let _ = write!(stdout, "{message}");
    let _ = stdout.flush();
}

//! Filesystem layout helpers for the `func` tool root.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::error::CoreError;

/// Environment variable that overrides the default root directory.
const ROOT_ENV_KEY: &str = "FUNC_CLI_ROOT";
const DEFAULT_ROOT_DIRNAME: &str = ".func-cli";

/// Descriptor for the on-disk directory structure.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
    logs_dir: PathBuf,
}

impl Layout {
    /// Construct a new layout without touching the filesystem.
    pub fn new(root: PathBuf) -> Self {
        let logs_dir = root.join("logs");
        Self { root, logs_dir }
    }

    /// Ensure that all directories exist on disk.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.root(), self.logs_dir(), self.host_logs_dir().as_path()] {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|source| CoreError::CreateDirectory {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Root directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that stores logs.
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Rolling JSON logs written by `func host start`.
    pub fn host_logs_dir(&self) -> PathBuf {
        self.logs_dir.join("host")
    }

    /// stderr of hosts launched by discovery.
    pub fn host_startup_log_path(&self) -> PathBuf {
        self.logs_dir.join("host-startup.log")
    }

    /// Persistent user settings.
    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.toml")
    }
}

/// Determine the default root directory.
pub fn default_root() -> Result<PathBuf> {
    if let Ok(value) = env::var(ROOT_ENV_KEY) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }

    let home = user_home_dir().ok_or(CoreError::HomeDirectoryUnknown)?;
    Ok(home.join(DEFAULT_ROOT_DIRNAME))
}

/// Resolve the layout from an optional `--root` override.
pub fn resolve_layout(root_override: Option<PathBuf>) -> Result<Layout> {
    let root = match root_override {
        Some(path) => expand_tilde(path)?,
        None => default_root()?,
    };
    Ok(Layout::new(root))
}

pub fn expand_tilde(path: PathBuf) -> Result<PathBuf> {
    if let Some(str_path) = path.to_str() {
        if let Some(stripped) = str_path.strip_prefix('~') {
            let home = user_home_dir().context("cannot expand '~', HOME unset")?;
            if stripped.is_empty() {
                return Ok(home);
            }
            let stripped = stripped.strip_prefix(['/', '\\']).unwrap_or(stripped);
            return Ok(home.join(stripped));
        }
    }
    Ok(path)
}

fn user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }

    if let Ok(profile) = env::var("USERPROFILE") {
        if !profile.is_empty() {
            return Some(PathBuf::from(profile));
        }
    }

    None
}

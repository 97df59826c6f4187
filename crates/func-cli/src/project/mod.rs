use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use blake3::Hasher;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::ffi::OsStrExt as _;
#[cfg(windows)]
use std::os::windows::ffi::OsStrExt as _;

use crate::error::CoreError;

/// Descriptor file marking the root of a function app.
pub const HOST_METADATA_FILE: &str = "host.json";
/// Local-only settings file next to `host.json`.
pub const LOCAL_SETTINGS_FILE: &str = "local.settings.json";
/// Per-function metadata file inside each function directory.
pub const FUNCTION_METADATA_FILE: &str = "function.json";

const DERIVED_ID_HEX_LEN: usize = 16;

/// Identifier of the function app a host is serving.
///
/// Comparison ignores ASCII case, matching how hosts report their id.
#[derive(Debug, Clone, Eq)]
pub struct HostIdentity(String);

impl HostIdentity {
    /// Returns `None` for blank input: a blank id identifies nothing.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() { None } else { Some(HostIdentity(trimmed.to_string())) }
    }

    /// Stable identity derived from the app root path, used by hosts whose
    /// `host.json` carries no `id`.
    pub fn derived_from_path(path: &Path) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&path_signature(path));
        let hex = hasher.finalize().to_hex().to_string();
        HostIdentity(hex[..DERIVED_ID_HEX_LEN.min(hex.len())].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for HostIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn path_signature(path: &Path) -> Vec<u8> {
    #[cfg(unix)]
    {
        path.as_os_str().as_bytes().to_vec()
    }
    #[cfg(windows)]
    {
        path.as_os_str()
            .encode_wide()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<u8>>()
    }
    #[cfg(not(any(unix, windows)))]
    {
        path.to_string_lossy().as_bytes().to_vec()
    }
}

#[derive(Debug, Default, Deserialize)]
struct LocalSettingsDocument {
    #[serde(rename = "Host", alias = "host", default)]
    host: Option<LocalHostSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalHostSettings {
    #[serde(rename = "LocalHttpPort", alias = "localHttpPort", default)]
    local_http_port: Option<u16>,
}

/// A function app on disk, rooted at the directory holding `host.json`.
#[derive(Debug, Clone)]
pub struct FunctionApp {
    root: PathBuf,
}

impl FunctionApp {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Walk up from `start` to the nearest directory containing `host.json`.
    /// Falls back to `start` itself when no ancestor has one.
    pub fn discover(start: &Path) -> Self {
        for ancestor in start.ancestors() {
            if ancestor.join(HOST_METADATA_FILE).is_file() {
                debug!(root = %ancestor.display(), "found function app root");
                return Self::new(ancestor.to_path_buf());
            }
        }
        debug!(start = %start.display(), "no host.json found, using start directory");
        Self::new(start.to_path_buf())
    }

    /// Discover from the process working directory.
    pub fn from_current_dir() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::discover(&cwd))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn host_json_path(&self) -> PathBuf {
        self.root.join(HOST_METADATA_FILE)
    }

    pub fn local_settings_path(&self) -> PathBuf {
        self.root.join(LOCAL_SETTINGS_FILE)
    }

    /// Read the `id` field of `host.json`.
    ///
    /// `Ok(None)` when the file is absent or the field missing or blank.
    pub fn read_host_id(&self) -> Result<Option<HostIdentity>> {
        let Some(doc) = read_json_if_exists(&self.host_json_path())? else {
            return Ok(None);
        };
        Ok(doc.get("id").and_then(Value::as_str).and_then(HostIdentity::new))
    }

    /// Identity used to recognise a host serving this app. Never fails:
    /// unreadable or malformed descriptors are logged and treated as absent.
    pub fn local_identity(&self) -> Option<HostIdentity> {
        match self.read_host_id() {
            Ok(identity) => identity,
            Err(err) => {
                warn!(
                    error = ?err,
                    path = %self.host_json_path().display(),
                    "ignoring unreadable host descriptor"
                );
                None
            }
        }
    }

    /// Identity a host reports for this app: the configured id, or one derived
    /// from the root path.
    pub fn served_identity(&self) -> HostIdentity {
        self.local_identity().unwrap_or_else(|| HostIdentity::derived_from_path(&self.root))
    }

    /// `Host.LocalHttpPort` from `local.settings.json`, if configured.
    pub fn local_http_port(&self) -> Result<Option<u16>> {
        let path = self.local_settings_path();
        let Some(doc) = read_json_if_exists(&path)? else {
            return Ok(None);
        };
        let settings: LocalSettingsDocument = serde_json::from_value(doc)
            .map_err(|source| CoreError::ParseJson { path: path.clone(), source })?;
        Ok(settings.host.and_then(|host| host.local_http_port).filter(|port| *port != 0))
    }

    /// Directory for a named function when it has a `function.json`.
    pub fn function_dir(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." || name == "." {
            return None;
        }
        let dir = self.root.join(name);
        dir.join(FUNCTION_METADATA_FILE).is_file().then_some(dir)
    }

    /// Names of all functions in the app, sorted.
    pub fn list_functions(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.root)
            .map_err(|source| CoreError::ReadFile { path: self.root.clone(), source })?;
        for entry in entries {
            let entry =
                entry.map_err(|source| CoreError::ReadFile { path: self.root.clone(), source })?;
            let path = entry.path();
            if path.is_dir() && path.join(FUNCTION_METADATA_FILE).is_file() {
                if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn read_json_if_exists(path: &Path) -> Result<Option<Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .map_err(|source| CoreError::ReadFile { path: path.to_path_buf(), source })?;
    let value = serde_json::from_str(&content)
        .map_err(|source| CoreError::ParseJson { path: path.to_path_buf(), source })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn identities_compare_case_insensitively() {
        let lower = HostIdentity::new("my-app").unwrap();
        let upper = HostIdentity::new("MY-APP").unwrap();
        assert_eq!(lower, upper);
        assert_ne!(lower, HostIdentity::new("other-app").unwrap());
        assert!(HostIdentity::new("   ").is_none());
    }

    #[test]
    fn discover_walks_up_to_host_json() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join(HOST_METADATA_FILE), r#"{"id": "outer"}"#).unwrap();
        let nested = tmp.path().join("HttpTrigger").join("deeper");
        fs::create_dir_all(&nested).unwrap();

        let app = FunctionApp::discover(&nested);
        assert_eq!(app.root(), tmp.path());
        assert_eq!(app.local_identity(), HostIdentity::new("outer"));
    }

    #[test]
    fn missing_descriptor_or_field_means_no_identity() {
        let tmp = tempdir().unwrap();
        let app = FunctionApp::new(tmp.path().to_path_buf());
        assert_eq!(app.local_identity(), None);

        fs::write(app.host_json_path(), r#"{"version": "2.0"}"#).unwrap();
        assert_eq!(app.local_identity(), None);

        fs::write(app.host_json_path(), "not json").unwrap();
        assert!(app.read_host_id().is_err());
        assert_eq!(app.local_identity(), None);
    }

    #[test]
    fn served_identity_is_derived_when_unset() {
        let tmp = tempdir().unwrap();
        let app = FunctionApp::new(tmp.path().to_path_buf());
        let derived = app.served_identity();
        assert_eq!(derived.as_str().len(), DERIVED_ID_HEX_LEN);
        assert_eq!(derived, app.served_identity());
    }

    #[test]
    fn reads_local_http_port() {
        let tmp = tempdir().unwrap();
        let app = FunctionApp::new(tmp.path().to_path_buf());
        assert_eq!(app.local_http_port().unwrap(), None);

        fs::write(
            app.local_settings_path(),
            r#"{"IsEncrypted": false, "Values": {}, "Host": {"LocalHttpPort": 7090}}"#,
        )
        .unwrap();
        assert_eq!(app.local_http_port().unwrap(), Some(7090));
    }

    #[test]
    fn lists_only_directories_with_function_json() {
        let tmp = tempdir().unwrap();
        let app = FunctionApp::new(tmp.path().to_path_buf());
        for name in ["Beta", "Alpha"] {
            let dir = tmp.path().join(name);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join(FUNCTION_METADATA_FILE), "{}").unwrap();
        }
        fs::create_dir(tmp.path().join("node_modules")).unwrap();

        assert_eq!(app.list_functions().unwrap(), vec!["Alpha", "Beta"]);
        assert!(app.function_dir("Alpha").is_some());
        assert!(app.function_dir("node_modules").is_none());
        assert!(app.function_dir("../Alpha").is_none());
    }
}

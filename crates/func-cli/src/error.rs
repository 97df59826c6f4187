use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde_json::Error as JsonError;
use thiserror::Error;
use toml_edit::{de::Error as TomlDeError, ser::Error as TomlSerError};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("host executable not found at {path}")]
    HostExecutableNotFound { path: PathBuf },

    #[error("failed to launch host using {path}")]
    HostLaunchFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no usable host found after {attempts} attempts starting at port {base_port}")]
    DiscoveryExhausted { base_port: u16, attempts: usize, rejected_ports: Vec<u16> },

    #[error("host at {uri} did not respond within {timeout:?}")]
    HostNotReachable { uri: String, timeout: Duration },

    #[error("host request to {uri} failed")]
    HostRequest {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to initialise HTTP client")]
    HttpClientInit {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to create directory {path}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse JSON file {path}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: JsonError,
    },

    #[error("failed to parse settings file {path}")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: TomlDeError,
    },

    #[error("failed to serialise settings to TOML")]
    SettingsSerialise {
        #[source]
        source: TomlSerError,
    },

    #[error("failed to write settings file {path}")]
    SettingsWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to determine user home directory for FUNC_CLI_ROOT")]
    HomeDirectoryUnknown,
}

impl CoreError {
    pub fn message_key(&self) -> &'static str {
        match self {
            CoreError::HostExecutableNotFound { .. } => "core.host_executable_not_found",
            CoreError::HostLaunchFailed { .. } => "core.host_launch_failed",
            CoreError::DiscoveryExhausted { rejected_ports, .. } => {
                if rejected_ports.is_empty() {
                    "core.discovery_exhausted"
                } else {
                    "core.discovery_exhausted_with_ports"
                }
            }
            CoreError::HostNotReachable { .. } => "core.host_not_reachable",
            CoreError::HostRequest { .. } => "core.host_request_failed",
            CoreError::HttpClientInit { .. } => "core.http_client_failed",
            CoreError::CreateDirectory { .. } => "core.create_dir_failed",
            CoreError::ReadFile { .. } => "core.read_file_failed",
            CoreError::ParseJson { .. } => "core.parse_json_failed",
            CoreError::SettingsParse { .. } => "core.settings_parse_failed",
            CoreError::SettingsSerialise { .. } => "core.settings_serialise_failed",
            CoreError::SettingsWrite { .. } => "core.settings_write_failed",
            CoreError::HomeDirectoryUnknown => "core.home_dir_unknown",
        }
    }

    pub fn placeholders(&self) -> Vec<(&'static str, String)> {
        match self {
            CoreError::HostExecutableNotFound { path } => vec![("path", display_path(path))],
            CoreError::HostLaunchFailed { path, source } => {
                vec![("path", display_path(path)), ("error", source.to_string())]
            }
            CoreError::DiscoveryExhausted { base_port, attempts, rejected_ports } => {
                let ports = rejected_ports
                    .iter()
                    .map(|port| port.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![
                    ("base_port", base_port.to_string()),
                    ("attempts", attempts.to_string()),
                    ("ports", ports),
                ]
            }
            CoreError::HostNotReachable { uri, timeout } => {
                vec![("uri", uri.clone()), ("timeout", format!("{}", timeout.as_secs()))]
            }
            CoreError::HostRequest { uri, source } => {
                vec![("uri", uri.clone()), ("error", source.to_string())]
            }
            CoreError::HttpClientInit { source } => vec![("error", source.to_string())],
            CoreError::CreateDirectory { path, source }
            | CoreError::ReadFile { path, source }
            | CoreError::SettingsWrite { path, source } => {
                vec![("path", display_path(path)), ("error", source.to_string())]
            }
            CoreError::ParseJson { path, source } => {
                vec![("path", display_path(path)), ("error", source.to_string())]
            }
            CoreError::SettingsParse { path, source } => {
                vec![("path", display_path(path)), ("error", source.to_string())]
            }
            CoreError::SettingsSerialise { source } => vec![("error", source.to_string())],
            CoreError::HomeDirectoryUnknown => Vec::new(),
        }
    }

    /// Whether the command layer should suggest pointing `--host-executable` elsewhere.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            CoreError::HostExecutableNotFound { .. } | CoreError::HostLaunchFailed { .. }
        )
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

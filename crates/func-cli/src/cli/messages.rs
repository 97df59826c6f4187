use std::{net::SocketAddr, sync::OnceLock};

use crate::CoreError;
use anyhow::Error as AnyhowError;
use clap::{Command, builder::Arg};

const PLACEHOLDER_PREFIX: &str = "i18n:";

static MESSAGES: OnceLock<Messages> = OnceLock::new();

fn interpolate(template: &str, values: &[(&str, String)]) -> String {
    let mut result = template.to_owned();
    for (key, value) in values {
        let placeholder = format!("{{{key}}}");
        result = result.replace(&placeholder, value);
    }
    result
}

pub fn messages() -> &'static Messages {
    MESSAGES.get_or_init(|| Messages { _private: () })
}

/// Catalog of user-facing text.
pub struct Messages {
    _private: (),
}

impl Messages {
    pub fn error_prefix(&self) -> &'static str {
        self.text("errors.prefix")
    }

    pub fn launch_notice(&self) -> impl Iterator<Item = &'static str> {
        ["launch.notice.line1", "launch.notice.line2"].into_iter().map(|key| self.text(key))
    }

    pub fn launch_notice_prompt(&self) -> &'static str {
        self.text("launch.notice.prompt")
    }

    pub fn launch_failure_hint(&self) -> &'static str {
        self.text("launch.failure_hint")
    }

    pub fn shutting_down(&self) -> &'static str {
        self.text("shutdown.in_progress")
    }

    pub fn forced_shutdown(&self) -> &'static str {
        self.text("shutdown.forced")
    }

    pub fn connected(&self, uri: &str) -> String {
        interpolate(self.text("status.connected"), &[("uri", uri.to_string())])
    }

    pub fn host_status_fields(&self) -> [&'static str; 5] {
        [
            self.text("status.id"),
            self.text("status.state"),
            self.text("status.version"),
            self.text("status.started_at"),
            self.text("status.uptime"),
        ]
    }

    pub fn host_errors_header(&self) -> &'static str {
        self.text("status.errors")
    }

    pub fn host_status_failed(&self, status: u16) -> String {
        interpolate(self.text("run.host_status_failed"), &[("status", status.to_string())])
    }

    pub fn function_status_failed(&self, name: &str, status: u16) -> String {
        interpolate(
            self.text("run.function_status_failed"),
            &[("name", name.to_string()), ("status", status.to_string())],
        )
    }

    pub fn response_status(&self, status: u16) -> String {
        interpolate(self.text("run.response_status"), &[("status", status.to_string())])
    }

    pub fn host_listening(&self, addr: SocketAddr, id: &str) -> String {
        interpolate(
            self.text("host.listening"),
            &[("addr", addr.to_string()), ("id", id.to_string())],
        )
    }

    pub fn host_functions(&self, names: &[String]) -> String {
        interpolate(self.text("host.functions"), &[("names", join_list(names))])
    }

    pub fn pause_on_error(&self) -> &'static str {
        self.text("host.pause_on_error")
    }

    pub fn render_anyhow(&self, err: &AnyhowError) -> String {
        if let Some(core) = err.downcast_ref::<CoreError>() {
            return self.render_core_error(core);
        }
        for cause in err.chain().skip(1) {
            if let Some(core) = cause.downcast_ref::<CoreError>() {
                return self.render_core_error(core);
            }
        }
        err.to_string()
    }

    /// The `CoreError` behind `err`, if any.
    pub fn core_error<'a>(&self, err: &'a AnyhowError) -> Option<&'a CoreError> {
        err.chain().find_map(|cause| cause.downcast_ref::<CoreError>())
    }

    fn render_core_error(&self, error: &CoreError) -> String {
        let message = self.text(error.message_key());
        let placeholders = error.placeholders();
        interpolate(message, &placeholders)
    }

    fn text(&self, key: &str) -> &'static str {
        english_text(key)
    }

    pub fn translate_placeholder(&self, candidate: &str) -> Option<&'static str> {
        let key = candidate.trim().strip_prefix(PLACEHOLDER_PREFIX)?;
        Some(self.text(key))
    }
}

pub fn localize_command(mut command: Command, messages: &Messages) -> Command {
    if let Some(about) = command
        .get_about()
        .and_then(|styled| messages.translate_placeholder(&styled.to_string()))
    {
        command = command.about(about);
    }

    command = command.mut_args(|arg| localize_arg(arg, messages));
    command = command.mut_subcommands(|sub| localize_command(sub, messages));
    command
}

fn localize_arg(mut arg: Arg, messages: &Messages) -> Arg {
    if let Some(help) = arg
        .get_help()
        .and_then(|styled| messages.translate_placeholder(&styled.to_string()))
    {
        arg = arg.help(help);
    }
    arg
}

fn join_list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn english_text(key: &str) -> &'static str {
    match key {
        "cli.about" => "Run and manage a local Functions host",
        "cli.root_help" => "Override the root directory for settings and logs.",
        "command.host.about" => "Manage the local Functions host.",
        "command.host.start.about" => "Start the local host for the current function app.",
        "command.host.status.about" => "Connect to the local host and print its status.",
        "command.run.about" => "Invoke a function through the local host.",
        "args.start.port" => "Port to listen on.",
        "args.start.pause_on_error" => "Wait for Enter before exiting when startup fails.",
        "args.start.script_root" => "Function app directory (defaults to the current app).",
        "args.connect.port" => "First port to probe for a running host.",
        "args.connect.timeout" => "Seconds to wait for the host to answer.",
        "args.connect.max_attempts" => "Number of ports to try before giving up.",
        "args.connect.no_interactive" => "Never prompt; skip the launch notice.",
        "args.connect.host_executable" => "Executable used to launch a new host.",
        "args.run.function" => "Name of the function to invoke.",
        "args.run.content" => "Input passed to the function.",
        "args.run.file" => "File whose content is passed to the function.",
        "errors.prefix" => "error:",
        "launch.notice.line1" => "We need to launch a server that will host and run your functions.",
        "launch.notice.line2" => "The server will auto load any changes you make to the function.",
        "launch.notice.prompt" => {
            "Do you want to always display this warning before launching a new server [yes/no]? [yes] "
        }
        "launch.failure_hint" => {
            "Use --host-executable or FUNC_CLI_HOST_EXECUTABLE to point at the host binary."
        }
        "shutdown.in_progress" => "Shutting down local host...",
        "shutdown.forced" => "Host did not stop within the grace period, exiting.",
        "status.connected" => "Connected to host at {uri}",
        "status.id" => "Id",
        "status.state" => "State",
        "status.version" => "Version",
        "status.started_at" => "Started",
        "status.uptime" => "Uptime (s)",
        "status.errors" => "Host errors:",
        "run.host_status_failed" => "Error calling the host status endpoint: {status}",
        "run.function_status_failed" => {
            "Error calling the status endpoint of function '{name}': {status}"
        }
        "run.response_status" => "Response Status Code: {status}",
        "host.listening" => "Host {id} listening on http://{addr}/",
        "host.functions" => "Functions: {names}",
        "host.pause_on_error" => "Press Enter to exit.",
        "core.host_executable_not_found" => "Host executable not found at {path}",
        "core.host_launch_failed" => "Failed to launch host using {path}: {error}",
        "core.discovery_exhausted" => {
            "No usable host found after {attempts} attempts starting at port {base_port}"
        }
        "core.discovery_exhausted_with_ports" => {
            "No usable host found after {attempts} attempts starting at port {base_port}; ports serving another app: {ports}"
        }
        "core.host_not_reachable" => "Host at {uri} did not respond within {timeout}s",
        "core.host_request_failed" => "Request to {uri} failed: {error}",
        "core.http_client_failed" => "Failed to initialise HTTP client: {error}",
        "core.create_dir_failed" => "Failed to create directory {path}: {error}",
        "core.read_file_failed" => "Failed to read {path}: {error}",
        "core.parse_json_failed" => "Failed to parse JSON file {path}: {error}",
        "core.settings_parse_failed" => "Failed to parse settings file {path}: {error}",
        "core.settings_serialise_failed" => "Failed to serialise settings: {error}",
        "core.settings_write_failed" => "Failed to write settings file {path}: {error}",
        "core.home_dir_unknown" => "Unable to determine the home directory; set FUNC_CLI_ROOT",
        _ => panic!("missing English text for key '{key}'"),
    }
}

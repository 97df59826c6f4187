use std::{fs, path::PathBuf, process, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use func_cli::{
    CoreError, FunctionApp, Layout, cli_messages, console,
    host::start::{self, StartArgs},
    paths::resolve_layout,
    supervisor::{
        ConnectedClient, Discovery, DiscoveryOptions, HttpIdentitySource, HttpProbe, LocalServer,
        ProcessLauncher, ProcessManager, ShutdownCoordinator, UNVERIFIED_IDENTITY_POLICY,
        client::{HostStatus, build_http_client},
        discovery::{DEFAULT_BASE_PORT, DEFAULT_MAX_ATTEMPTS},
        identity::STATUS_PATH,
        launcher::resolve_host_executable,
        process_manager::ProcessKiller,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit code after Ctrl+C, whether the command stopped in time or was forced.
const INTERRUPTED_EXIT_CODE: i32 = 130;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "func", version, about = "i18n:cli.about")]
struct Cli {
    #[arg(long, global = true, value_name = "DIR", help = "i18n:cli.root_help")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "i18n:command.host.about")]
    Host {
        #[command(subcommand)]
        command: HostCommand,
    },

    #[command(about = "i18n:command.run.about")]
    Run(RunArgs),
}

#[derive(Subcommand, Debug)]
enum HostCommand {
    #[command(about = "i18n:command.host.start.about")]
    Start(StartArgs),
    #[command(about = "i18n:command.host.status.about")]
    Status(ConnectArgs),
}

#[derive(Args, Debug, Clone)]
struct ConnectArgs {
    #[arg(long, default_value_t = DEFAULT_BASE_PORT, help = "i18n:args.connect.port")]
    port: u16,
    #[arg(
        short = 't',
        long,
        value_name = "SECONDS",
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        help = "i18n:args.connect.timeout"
    )]
    timeout: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, help = "i18n:args.connect.max_attempts")]
    max_attempts: usize,
    #[arg(long, help = "i18n:args.connect.no_interactive")]
    no_interactive: bool,
    #[arg(long, value_name = "PATH", help = "i18n:args.connect.host_executable")]
    host_executable: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(value_name = "FUNCTION", help = "i18n:args.run.function")]
    function: String,
    #[arg(short = 'c', long, conflicts_with = "file", help = "i18n:args.run.content")]
    content: Option<String>,
    #[arg(short = 'f', long, value_name = "FILE", help = "i18n:args.run.file")]
    file: Option<PathBuf>,
    #[command(flatten)]
    connect: ConnectArgs,
}

#[tokio::main]
async fn main() {
    let messages = cli_messages::messages();
    let command = cli_messages::localize_command(Cli::command(), messages);

    let mut matches = command.get_matches();
    let cli = Cli::from_arg_matches_mut(&mut matches).unwrap_or_else(|err| err.exit());

    let processes = Arc::new(ProcessManager::new());
    let coordinator = ShutdownCoordinator::new();
    let shutting_down = CancellationToken::new();
    coordinator.register(
        processes.clone(),
        {
            let shutting_down = shutting_down.clone();
            move || {
                console::error_line(messages.shutting_down());
                shutting_down.cancel();
            }
        },
        Some(Box::new({
            let processes = processes.clone();
            move || force_exit(&processes)
        })),
    );

    let result = run(cli, processes.clone(), shutting_down.clone()).await;
    coordinator.complete();
    coordinator.unregister();

    if let Err(err) = result {
        let rendered = messages.render_anyhow(&err);
        console::error_line(format!("{} {}", messages.error_prefix(), rendered));
        match messages.core_error(&err) {
            Some(core) if core.is_launch_failure() => {
                console::error_line(messages.launch_failure_hint());
            }
            // A host that never answered is not worth keeping around.
            Some(CoreError::HostNotReachable { .. }) => processes.kill_child_processes(),
            _ => {}
        }
        process::exit(1);
    }
    // A dropped prompt leaves a stdin read behind that the runtime would wait on.
    if shutting_down.is_cancelled() {
        process::exit(INTERRUPTED_EXIT_CODE);
    }
}

/// Runs on the grace timer, which does not depend on the command task being polled.
fn force_exit(processes: &ProcessManager) {
    console::error_line(cli_messages::messages().forced_shutdown());
    processes.kill_main_process(INTERRUPTED_EXIT_CODE)
}

async fn run(
    cli: Cli,
    processes: Arc<ProcessManager>,
    shutting_down: CancellationToken,
) -> Result<()> {
    let layout = resolve_layout(cli.root.clone())?;
    match cli.command {
        Command::Host { command: HostCommand::Start(args) } => {
            start::run(args, &layout, shutting_down).await
        }
        Command::Host { command: HostCommand::Status(args) } => {
            init_tracing();
            until_shutdown(handle_host_status(&layout, args, processes), &shutting_down).await
        }
        Command::Run(args) => {
            init_tracing();
            until_shutdown(handle_run(&layout, args, processes), &shutting_down).await
        }
    }
}

/// Drive `command` unless a shutdown starts first.
async fn until_shutdown(
    command: impl Future<Output = Result<()>>,
    shutting_down: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        result = command => result,
        _ = shutting_down.cancelled() => {
            info!("command interrupted");
            Ok(())
        }
    }
}

async fn connect(
    layout: &Layout,
    args: &ConnectArgs,
    processes: Arc<ProcessManager>,
) -> Result<ConnectedClient> {
    let app = FunctionApp::from_current_dir()?;
    let http = build_http_client()?;
    let fixed_port = app.local_http_port()?;

    let mut launcher = ProcessLauncher::new(resolve_host_executable(args.host_executable.clone()))
        .with_startup_log(layout.host_startup_log_path());
    if !args.no_interactive {
        launcher = launcher.with_launch_notice(layout.clone());
    }
    let options = DiscoveryOptions {
        base_port: args.port,
        max_attempts: args.max_attempts,
        identity_policy: UNVERIFIED_IDENTITY_POLICY,
    };
    debug!(root = %app.root().display(), ?fixed_port, ?options, "connecting to local host");

    let discovery = Discovery::new(
        HttpProbe::new(http.clone()),
        HttpIdentitySource::new(app, http.clone()),
        launcher,
        options,
    );
    let server = LocalServer::new(discovery, processes, http).with_fixed_port(fixed_port);
    let client = server.connect(Duration::from_secs(args.timeout)).await?;
    Ok(client)
}

async fn handle_host_status(
    layout: &Layout,
    args: ConnectArgs,
    processes: Arc<ProcessManager>,
) -> Result<()> {
    let client = connect(layout, &args, processes).await?;
    let status = client.host_status().await?;
    let messages = cli_messages::messages();

    console::line(messages.connected(&client.base_uri()));
    let [id, state, version, started_at, uptime] = messages.host_status_fields();
    console::line(format!("{id}: {}", status.id));
    console::line(format!("{state}: {}", status.state));
    console::line(format!("{version}: {}", status.version));
    console::line(format!("{started_at}: {}", status.started_at.as_deref().unwrap_or("-")));
    console::line(format!("{uptime}: {}", status.process_uptime));
    print_host_errors(&status.errors);
    Ok(())
}

async fn handle_run(layout: &Layout, args: RunArgs, processes: Arc<ProcessManager>) -> Result<()> {
    let input = match (&args.content, &args.file) {
        (Some(content), _) => content.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?,
        (None, None) => String::new(),
    };

    let client = connect(layout, &args.connect, processes).await?;
    let messages = cli_messages::messages();

    let response = client.get(STATUS_PATH).await?;
    if !response.status().is_success() {
        bail!(messages.host_status_failed(response.status().as_u16()));
    }
    let status: HostStatus = response.json().await.context("failed to parse host status")?;

    let function_status = client.function_status(&args.function).await?;
    if !function_status.status().is_success() {
        let code = function_status.status().as_u16();
        bail!(messages.function_status_failed(&args.function, code));
    }
    print_host_errors(&status.errors);

    let response = client.invoke(&args.function, &input).await?;
    let code = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    console::line(messages.response_status(code));
    if !body.is_empty() {
        console::line(body);
    }
    Ok(())
}

fn print_host_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    console::error_line(cli_messages::messages().host_errors_header());
    for error in errors {
        console::error_line(format!("  {error}"));
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry().with(env_filter).with(stderr_layer).try_init();
}

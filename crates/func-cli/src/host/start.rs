//! `func host start`: serve the admin API for a function app.

use std::{
    io::{self, BufRead},
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{
    Layout, cli_messages, console,
    host::server::{self, HostState},
    paths::expand_tilde,
    project::FunctionApp,
    supervisor::discovery::DEFAULT_BASE_PORT,
};

#[derive(Args, Debug)]
pub struct StartArgs {
    #[arg(short = 'p', long, default_value_t = DEFAULT_BASE_PORT, help = "i18n:args.start.port")]
    pub port: u16,
    #[arg(long, help = "i18n:args.start.pause_on_error")]
    pub pause_on_error: bool,
    #[arg(long, value_name = "DIR", help = "i18n:args.start.script_root")]
    pub script_root: Option<PathBuf>,
}

/// Run the host until `shutdown` fires.
pub async fn run(args: StartArgs, layout: &Layout, shutdown: CancellationToken) -> Result<()> {
    layout.ensure()?;
    let _tracing_guard = init_tracing(layout)?;

    let pause_on_error = args.pause_on_error;
    if let Err(err) = run_impl(args, shutdown).await {
        error!(error = ?err, "host terminated with error");
        if pause_on_error {
            let messages = cli_messages::messages();
            console::error_line(format!(
                "{} {}",
                messages.error_prefix(),
                messages.render_anyhow(&err)
            ));
            console::line(messages.pause_on_error());
            wait_for_enter().await;
        }
        return Err(err);
    }
    info!("host exited cleanly");
    Ok(())
}

async fn run_impl(args: StartArgs, shutdown: CancellationToken) -> Result<()> {
    let app = match args.script_root {
        Some(dir) => FunctionApp::discover(&expand_tilde(dir)?),
        None => FunctionApp::from_current_dir()?,
    };
    let state = HostState::new(app);
    let functions = state.app().list_functions().unwrap_or_default();

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, args.port));
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("failed to bind host to {addr}"))?;
    let local_addr = listener.local_addr()?;

    info!(
        addr = %local_addr,
        id = %state.identity(),
        root = %state.app().root().display(),
        functions = functions.len(),
        "host ready"
    );
    let messages = cli_messages::messages();
    console::line(messages.host_listening(local_addr, state.identity().as_str()));
    console::line(messages.host_functions(&functions));

    server::serve(state, listener, shutdown).await
}

async fn wait_for_enter() {
    let _ = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    })
    .await;
}

fn init_tracing(layout: &Layout) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    let host_log_dir = layout.host_logs_dir();
    std::fs::create_dir_all(&host_log_dir).with_context(|| {
        format!("failed to create host log directory {}", host_log_dir.display())
    })?;
    let file_appender = rolling::hourly(host_log_dir, "host.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

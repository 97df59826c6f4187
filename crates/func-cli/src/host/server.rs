use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Instant};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    project::{FunctionApp, HostIdentity},
    supervisor::client::{FunctionInvocation, HostStatus},
};

const RUNNING_STATE: &str = "Running";

/// Shared state of a running host.
#[derive(Clone)]
pub struct HostState {
    inner: Arc<HostInner>,
}

struct HostInner {
    app: FunctionApp,
    identity: HostIdentity,
    version: String,
    started_at: OffsetDateTime,
    started: Instant,
}

impl HostState {
    /// Host for `app`, reporting the app's configured id or one derived from its path.
    pub fn new(app: FunctionApp) -> Self {
        let identity = app.served_identity();
        Self::with_identity(app, identity)
    }

    pub fn with_identity(app: FunctionApp, identity: HostIdentity) -> Self {
        Self {
            inner: Arc::new(HostInner {
                app,
                identity,
                version: env!("CARGO_PKG_VERSION").to_string(),
                started_at: OffsetDateTime::now_utc(),
                started: Instant::now(),
            }),
        }
    }

    pub fn identity(&self) -> &HostIdentity {
        &self.inner.identity
    }

    pub fn app(&self) -> &FunctionApp {
        &self.inner.app
    }

    fn status(&self) -> HostStatus {
        HostStatus {
            id: self.inner.identity.to_string(),
            state: RUNNING_STATE.to_string(),
            version: self.inner.version.clone(),
            started_at: self.inner.started_at.format(&Rfc3339).ok(),
            process_uptime: self.inner.started.elapsed().as_secs(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct HostServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HostServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    pub name: String,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationAccepted {
    pub invocation_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

enum ApiError {
    NotFound(String),
}

impl ApiError {
    fn function_not_found(name: &str) -> Self {
        ApiError::NotFound(format!("function '{name}' not found"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub fn build_router(state: HostState) -> Router {
    Router::new()
        .route("/admin/host/ping", get(ping))
        .route("/admin/host/status", get(host_status))
        .route("/admin/functions/:name/status", get(function_status))
        .route("/admin/functions/:name", post(invoke_function))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` is cancelled.
pub async fn serve(
    state: HostState,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("host server stopped");
    Ok(())
}

pub async fn spawn_host_server(state: HostState, addr: SocketAddr) -> Result<HostServerHandle> {
    let router = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "host server listening");

    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            error!("host server terminated with error: {err}");
        }
    });

    Ok(HostServerHandle { addr: local_addr, task })
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

async fn host_status(State(state): State<HostState>) -> Json<HostStatus> {
    Json(state.status())
}

async fn function_status(
    State(state): State<HostState>,
    Path(name): Path<String>,
) -> Result<Json<FunctionStatus>, ApiError> {
    let directory =
        state.app().function_dir(&name).ok_or_else(|| ApiError::function_not_found(&name))?;
    Ok(Json(FunctionStatus { name, directory }))
}

async fn invoke_function(
    State(state): State<HostState>,
    Path(name): Path<String>,
    body: Option<Json<FunctionInvocation>>,
) -> Result<(StatusCode, Json<InvocationAccepted>), ApiError> {
    if state.app().function_dir(&name).is_none() {
        return Err(ApiError::function_not_found(&name));
    }
    let input = body.map(|Json(invocation)| invocation.input).unwrap_or_default();
    let invocation_id = Uuid::new_v4().to_string();
    info!(function = %name, %invocation_id, input_len = input.len(), "queued function invocation");
    Ok((StatusCode::ACCEPTED, Json(InvocationAccepted { invocation_id })))
}

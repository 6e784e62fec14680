//! # Admin HTTP API
//!
//! A small axum application over the supervisor, served when the admin UI
//! is enabled. Reads dominate: process listing, single-record lookup and
//! log retrieval. The two mutating endpoints mirror the `shell_bg_stop` and
//! `shell_bg_clean` tools and enforce the same rules: a running record can
//! be stopped but never cleaned.
//!
//! All payloads are JSON. Unknown pids map to 404, illegal transitions to
//! 409; nothing here can touch a process the MCP surface could not.

use std::str::FromStr;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::supervisor::{CleanOutcome, ProcessStatus, ProcessSupervisor, SupervisorError};

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    /// Comma-separated label filter, AND semantics.
    labels: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputQuery {
    #[serde(default)]
    tail: usize,
    #[serde(default)]
    stderr: bool,
}

#[derive(Debug, Deserialize)]
struct StopBody {
    #[serde(default)]
    force: bool,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn supervisor_error(e: SupervisorError) -> Response {
    let status = match e {
        SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
        SupervisorError::NotRunning => StatusCode::CONFLICT,
    };
    error_response(status, e.to_string())
}

async fn list_processes(
    State(supervisor): State<ProcessSupervisor>,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        Some(raw) => match ProcessStatus::from_str(raw) {
            Ok(status) => Some(status),
            Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
        },
        None => None,
    };
    let labels: Option<Vec<String>> = query.labels.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect()
    });

    let processes = supervisor.list(labels.as_deref(), status).await;
    Json(processes).into_response()
}

async fn get_process(
    State(supervisor): State<ProcessSupervisor>,
    Path(pid): Path<u64>,
) -> Response {
    match supervisor.detail(pid).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => supervisor_error(e),
    }
}

async fn get_process_output(
    State(supervisor): State<ProcessSupervisor>,
    Path(pid): Path<u64>,
    Query(query): Query<OutputQuery>,
) -> Response {
    match supervisor.output(pid, query.tail, query.stderr).await {
        Ok(lines) => Json(lines).into_response(),
        Err(e) => supervisor_error(e),
    }
}

async fn stop_process(
    State(supervisor): State<ProcessSupervisor>,
    Path(pid): Path<u64>,
    body: Option<Json<StopBody>>,
) -> Response {
    let force = body.map(|Json(body)| body.force).unwrap_or(false);
    match supervisor.stop(pid, force).await {
        Ok(_) => Json(json!({ "pid": pid, "stopping": true, "force": force })).into_response(),
        Err(e) => supervisor_error(e),
    }
}

async fn clean_process(
    State(supervisor): State<ProcessSupervisor>,
    Path(pid): Path<u64>,
) -> Response {
    let outcomes = supervisor.clean(&[pid]).await;
    match outcomes.first().map(|(_, outcome)| *outcome) {
        Some(CleanOutcome::Cleaned) => Json(json!({ "pid": pid, "cleaned": true })).into_response(),
        Some(CleanOutcome::StillRunning) => error_response(
            StatusCode::CONFLICT,
            format!("Process {pid} is still running"),
        ),
        _ => error_response(StatusCode::NOT_FOUND, format!("Process {pid} not found")),
    }
}

/// Builds the admin router. Split from [`serve`] so tests can drive it
/// without a socket.
pub fn router(supervisor: ProcessSupervisor) -> Router {
    Router::new()
        .route("/api/processes", get(list_processes))
        .route("/api/process/{pid}", get(get_process))
        .route("/api/process/{pid}/output", get(get_process_output))
        .route("/api/process/{pid}/stop", post(stop_process))
        .route("/api/process/{pid}/clean", post(clean_process))
        .with_state(supervisor)
}

/// Binds and serves the admin API until the process exits. A non-empty
/// `path_prefix` nests the whole application under that prefix.
pub async fn serve(
    supervisor: ProcessSupervisor,
    host: &str,
    port: u16,
    path_prefix: &str,
) -> anyhow::Result<()> {
    let app = router(supervisor);
    let app = match path_prefix.trim_matches('/') {
        "" => app,
        prefix => Router::new().nest(&format!("/{prefix}"), app),
    };

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;
    tracing::info!("Admin web interface listening on http://{local}");
    axum::serve(listener, app).await?;
    Ok(())
}

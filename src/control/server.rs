//! The axum HTTP control server: `GET /status`, `POST
//! /processes/{group}/{name}/{start,stop,restart}`, `GET
//! /processes/{group}/{name}/tail/{stream}`, `POST /shutdown`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{ControlOp, ProcessRef, TailStream};
use crate::event_loop::LoopEvent;

/// Cloneable handle held by every axum handler; the only thing they can do
/// with kernel state is ask the event loop for it.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<LoopEvent>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::Sender<LoopEvent>) -> Self {
        Self { tx }
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ControlOp) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(LoopEvent::Control(build(reply_tx))).await.is_err() {
            return None;
        }
        reply_rx.await.ok()
    }
}

/// Bind and serve the control surface until the listener errors or the
/// process is torn down from outside (the event loop aborts this task on
/// shutdown rather than asking it to shut down gracefully — the source's
/// control channel has no notion of its own graceful close either).
pub async fn serve(listen: &str, handle: ControlHandle) -> std::io::Result<()> {
    let app = Router::new()
        .route("/status", get(status))
        .route("/processes/{group}/{name}/start", post(start))
        .route("/processes/{group}/{name}/stop", post(stop))
        .route("/processes/{group}/{name}/restart", post(restart))
        .route("/processes/{group}/{name}/tail/{stream}", get(tail))
        .route("/shutdown", post(shutdown))
        .with_state(handle)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(listen).await?;
    info!(%listen, "control surface listening");
    axum::serve(listener, app).await
}

async fn status(State(handle): State<ControlHandle>) -> impl IntoResponse {
    match handle.call(ControlOp::Status).await {
        Some(rows) => Json(json!({ "processes": rows })).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "event loop unreachable").into_response(),
    }
}

async fn start(
    State(handle): State<ControlHandle>,
    Path((group, name)): Path<(String, String)>,
) -> impl IntoResponse {
    op_response(&handle, ProcessRef { group, name }, ControlOp::Start).await
}

async fn stop(
    State(handle): State<ControlHandle>,
    Path((group, name)): Path<(String, String)>,
) -> impl IntoResponse {
    op_response(&handle, ProcessRef { group, name }, ControlOp::Stop).await
}

async fn restart(
    State(handle): State<ControlHandle>,
    Path((group, name)): Path<(String, String)>,
) -> impl IntoResponse {
    op_response(&handle, ProcessRef { group, name }, ControlOp::Restart).await
}

async fn op_response(
    handle: &ControlHandle,
    target: ProcessRef,
    build: impl FnOnce(ProcessRef, oneshot::Sender<Result<(), String>>) -> ControlOp,
) -> impl IntoResponse {
    match handle.call(|tx| build(target, tx)).await {
        Some(Ok(())) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Some(Err(e)) => (StatusCode::NOT_FOUND, Json(json!({ "error": e }))).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "event loop unreachable").into_response(),
    }
}

async fn tail(
    State(handle): State<ControlHandle>,
    Path((group, name, stream)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let stream = match stream.as_str() {
        "stdout" => TailStream::Stdout,
        "stderr" => TailStream::Stderr,
        _ => return (StatusCode::BAD_REQUEST, "stream must be stdout or stderr").into_response(),
    };
    let target = ProcessRef { group, name };
    match handle.call(|tx| ControlOp::Tail(target, stream, tx)).await {
        Some(Ok(bytes)) => (StatusCode::OK, bytes).into_response(),
        Some(Err(e)) => (StatusCode::NOT_FOUND, Json(json!({ "error": e }))).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "event loop unreachable").into_response(),
    }
}

async fn shutdown(State(handle): State<ControlHandle>) -> impl IntoResponse {
    match handle.call(ControlOp::Shutdown).await {
        Some(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "event loop unreachable").into_response(),
    }
}

//! HTTP transport. Every route funnels into the same dispatcher as stdio, so
//! the response body is always the `{id, ok, result|error}` envelope.

use crate::config::Config;
use crate::ipc::{self, AppState, Request};
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type SharedState = Arc<Mutex<AppState>>;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Routes:
/// - `GET /health`
/// - `GET /api/:method` with string params from the query
/// - `POST /api/:method` with a JSON object body (empty means `{}`)
pub fn build_router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/:method", get(call_with_query).post(call_with_body))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "bad_params" | "bad_json" => StatusCode::BAD_REQUEST,
        "not_found" | "not_implemented" => StatusCode::NOT_FOUND,
        "conflict" | "no_workspace" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn envelope_response(envelope: Value) -> Response {
    let status = if envelope.get("ok").and_then(Value::as_bool) == Some(true) {
        StatusCode::OK
    } else {
        envelope
            .pointer("/error/code")
            .and_then(Value::as_str)
            .map(status_for_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };
    (status, Json(envelope)).into_response()
}

async fn dispatch(state: SharedState, req: Request) -> Response {
    let id = req.id.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        ipc::handle_request(&mut guard, req)
    })
    .await;
    match joined {
        Ok(envelope) => envelope_response(envelope),
        Err(e) => {
            error!(id = %id, error = %e, "request task failed");
            envelope_response(ipc::err(&id, "internal", "request task failed", None))
        }
    }
}

async fn health(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let req = Request {
        id: request_id(&headers),
        method: "health".to_string(),
        params: json!({}),
    };
    dispatch(state, req).await
}

async fn call_with_query(
    State(state): State<SharedState>,
    Path(method): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let params: serde_json::Map<String, Value> = query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let req = Request {
        id: request_id(&headers),
        method,
        params: Value::Object(params),
    };
    dispatch(state, req).await
}

async fn call_with_body(
    State(state): State<SharedState>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let id = request_id(&headers);
    // Over-limit and unreadable bodies still answer with an envelope.
    let body = match body {
        Ok(b) => b,
        Err(rejection) => {
            warn!(id = %id, method = %method, status = %rejection.status(), "request body rejected");
            return envelope_response(ipc::err(
                &id,
                "bad_params",
                rejection.body_text(),
                Some(json!({ "httpStatus": rejection.status().as_u16() })),
            ));
        }
    };
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(Value::Null) => json!({}),
            Ok(_) => {
                return envelope_response(ipc::err(
                    &id,
                    "bad_params",
                    "request body must be a JSON object",
                    None,
                ))
            }
            Err(e) => {
                warn!(id = %id, method = %method, "malformed request body");
                return envelope_response(ipc::err(&id, "bad_json", e.to_string(), None));
            }
        }
    };
    dispatch(state, Request { id, method, params }).await
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                warn!("could not register signal handlers; falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

pub async fn serve(config: &Config, state: SharedState) -> anyhow::Result<()> {
    let addr = config
        .bind
        .context("no bind address resolved for the http transport")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "http transport listening");
    axum::serve(listener, build_router(state, config.max_body_bytes))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("http server failed")?;
    info!("http transport stopped");
    Ok(())
}

//! HTTP surface for the bridge.
//!
//! One axum router: `POST /` carries JSON-RPC messages, `GET /` returns a
//! static service descriptor, `GET /health` is a liveness probe. CORS is
//! permissive so browser-based MCP clients can reach the endpoint.
//!
//! Every per-request failure becomes an HTTP 200 with a JSON-RPC error
//! object — callers never see a bare transport error for something that
//! happened on the child side.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::{AppError, Result};

/// JSON-RPC error code for internal failures (timeout, crash, write error).
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC error code for an unparseable request body.
pub const PARSE_ERROR: i64 = -32700;

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The bridge instance serving this endpoint.
    pub bridge: Arc<Bridge>,
}

/// Build the axum `Router` with all bridge routes.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_descriptor).post(handle_message))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `port` on loopback and serve until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the bind fails or the server errors out.
pub async fn serve(state: AppState, port: u16, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind on {bind}: {err}")))?;

    info!(%bind, "starting HTTP bridge endpoint");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Config(format!("server error: {err}")))?;

    info!("HTTP bridge endpoint shut down");
    Ok(())
}

/// Handler for `GET /health` — returns 200 OK with a plain-text body.
async fn handle_health() -> &'static str {
    "ok"
}

/// Handler for `GET /` — static service descriptor.
async fn handle_descriptor() -> impl IntoResponse {
    Json(json!({
        "name": "mcp-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "transport": "streamable_http",
        "description": "stdio JSON-RPC server exposed over HTTP",
        "client_config": {
            "mcp": { "transport": "streamable_http", "endpoint": "/" }
        },
    }))
}

/// Handler for `POST /` — the JSON-RPC bridge endpoint.
///
/// Notifications yield `204 No Content`; requests yield `200` with the
/// correlated response or a JSON-RPC error object carrying the caller's
/// original id.
async fn handle_message(State(state): State<AppState>, body: String) -> Response {
    let message: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "unparseable request body");
            return json_rpc_error(Value::Null, PARSE_ERROR, "Parse error");
        }
    };

    let method = message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();
    let client_id = message.get("id").cloned().unwrap_or(Value::Null);
    info!(method, "received message");

    match state.bridge.handle(message).await {
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            warn!(%err, method, "request failed");
            json_rpc_error(client_id, INTERNAL_ERROR, &format!("Internal error: {err}"))
        }
    }
}

/// Produce an HTTP 200 JSON-RPC error response.
fn json_rpc_error(id: Value, code: i64, message: &str) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id,
    });
    (StatusCode::OK, Json(body)).into_response()
}

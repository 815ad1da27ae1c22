//! HTTP façade.
//!
//! # Routes
//! - `POST /api/users/register` and `GET /api/users` go through the dispatcher.
//! - `GET /health` and the `/api/circuit-breaker/*` routes expose breaker state.
//!
//! # Response mapping
//! - downstream success or downstream 4xx/5xx: status, content type and body forwarded verbatim
//! - breaker open: `503` with `code = "CIRCUIT_OPEN"` and the breaker status
//! - timeout, connection failure, unknown target: `500` with a diagnostic message

use crate::dispatch::{DispatchError, Dispatcher};
use crate::downstream::DownstreamResponse;
use crate::registry::RegistryError;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

/// Build the router with every route and the tracing layer.
pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users/register", post(register_user))
        .route("/api/users", get(list_users))
        .route("/api/circuit-breaker/status", get(breaker_status))
        .route("/api/circuit-breaker/reset", post(reset_all))
        .route("/api/circuit-breaker/{target}/reset", post(reset_one))
        .with_state(AppState { dispatcher })
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, dispatcher: Dispatcher, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    axum::serve(listener, router(dispatcher)).with_graceful_shutdown(shutdown).await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or on SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        () = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "circuitBreakers": state.dispatcher.status(),
    }))
}

async fn register_user(State(state): State<AppState>, body: Bytes) -> Response {
    match state.dispatcher.register_user(body).await {
        Ok(response) => forward(response),
        Err(error) => error.into_response(),
    }
}

async fn list_users(State(state): State<AppState>) -> Response {
    match state.dispatcher.list_users().await {
        Ok(response) => forward(response),
        Err(error) => error.into_response(),
    }
}

async fn breaker_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "circuitBreakers": state.dispatcher.status() }))
}

async fn reset_all(State(state): State<AppState>) -> Json<serde_json::Value> {
    let statuses = state.dispatcher.reset_all().await;
    tracing::info!(targets = statuses.len(), "all circuit breakers reset");
    Json(json!({ "circuitBreakers": statuses }))
}

async fn reset_one(State(state): State<AppState>, Path(target): Path<String>) -> Response {
    match state.dispatcher.reset(&target).await {
        Ok(status) => Json(json!({ "target": target, "circuitBreaker": status })).into_response(),
        Err(error @ RegistryError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Not found", "message": error.to_string() })),
        )
            .into_response(),
    }
}

/// Replay a downstream response as-is.
fn forward(response: DownstreamResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;
    if let Some(value) = response.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        out.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    out
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match self {
            DispatchError::CircuitOpen { status, .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Service unavailable",
                    "code": "CIRCUIT_OPEN",
                    "circuitBreaker": status,
                })),
            )
                .into_response(),
            DispatchError::Downstream(error) => match error.response() {
                Some(response) => forward(response),
                None => internal_error(&error),
            },
            DispatchError::UnknownTarget(_) => internal_error(&self),
        }
    }
}

fn internal_error(error: &dyn std::error::Error) -> Response {
    tracing::warn!(%error, "request failed without a downstream response");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal error", "message": error.to_string() })),
    )
        .into_response()
}

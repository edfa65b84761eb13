//! Health and metrics HTTP surface.
//!
//! Every node role exposes the same two endpoints: `/healthz` reporting
//! the role, and `/metrics` in Prometheus text format. The server runs on
//! its own thread with its own runtime so the rest of the crate stays
//! blocking.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use serde_json::json;

use crate::errors::{Error, Result};

struct AppState {
    role: String,
    registry: Registry,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "role": state.role }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&state.registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("encoding metrics: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bind and serve on a dedicated thread. Returns once the listener is
/// bound so a bad port fails startup instead of logging into the void.
pub fn start_server(port: u16, role: &str, registry: Registry) -> Result<JoinHandle<()>> {
    let state = Arc::new(AppState {
        role: role.to_string(),
        registry,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| Error::Config(format!("building server runtime: {err}")))?;
    let listener = rt
        .block_on(tokio::net::TcpListener::bind(addr))
        .map_err(|err| Error::Config(format!("binding {addr}: {err}")))?;
    tracing::info!("serving /healthz and /metrics on {addr}");

    std::thread::Builder::new()
        .name("http-server".to_string())
        .spawn(move || {
            if let Err(err) = rt.block_on(async { axum::serve(listener, router(state)).await }) {
                tracing::error!("http server exited: {err}");
            }
        })
        .map_err(|err| Error::Config(format!("spawning http server: {err}")))
}

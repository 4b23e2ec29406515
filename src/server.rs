//! HTTP server
//!
//! Exposes the interception endpoint used by the proxy layer, a status
//! endpoint, and the cache file tree itself under `/cache` so rewritten
//! requests can be served directly.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::warn;

use crate::catalog::Catalog;
use crate::proxy::{ProxyDecision, RequestInterceptor};

pub struct ServerState {
    pub interceptor: RequestInterceptor,
    pub catalog: Arc<dyn Catalog>,
    pub node_id: String,
}

pub type SharedState = Arc<ServerState>;

/// `content_root` is the directory holding fetched files only; the catalog
/// database sits outside it and is never served.
pub fn create_router(state: SharedState, content_root: PathBuf) -> Router {
    Router::new()
        .route("/intercept", post(intercept))
        .route("/status", get(status))
        .route("/health", get(health))
        .nest_service("/cache", ServeDir::new(content_root))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct InterceptRequest {
    pub url: String,
    pub uri: String,
    pub client_addr: String,
}

/// POST /intercept
///
/// The proxy layer submits each candidate request here and either forwards
/// it unchanged or redirects the client to the returned target.
pub async fn intercept(
    State(state): State<SharedState>,
    Json(request): Json<InterceptRequest>,
) -> Json<ProxyDecision> {
    let decision = state
        .interceptor
        .intercept(&request.url, &request.uri, &request.client_addr);
    Json(decision)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub cached_items: usize,
    pub cached_bytes: u64,
    pub version: String,
}

/// GET /status
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let cached_items = match state.catalog.downloaded_ids() {
        Ok(ids) => ids.len(),
        Err(e) => {
            warn!(error = %e, "Catalog unavailable for status");
            0
        }
    };
    let cached_bytes = state.catalog.total_cached_size().unwrap_or(0);

    Json(StatusResponse {
        node_id: state.node_id.clone(),
        cached_items,
        cached_bytes,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

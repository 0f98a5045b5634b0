use axum::{
    extract::{FromRef, State},
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::channel::Channel;
use crate::peers::Peers;
use crate::signal;

#[derive(Clone)]
pub struct AppState {
    pub channel: Arc<Channel>,
    pub peers: Peers,
}

impl FromRef<AppState> for Arc<Channel> {
    fn from_ref(state: &AppState) -> Self {
        state.channel.clone()
    }
}

impl FromRef<AppState> for Peers {
    fn from_ref(state: &AppState) -> Self {
        state.peers.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub live: bool,
    pub publisher: Option<String>,
    pub viewers: usize,
    pub connections: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.channel.snapshot().await;
    Json(HealthResponse {
        live: snapshot.is_live(),
        publisher: snapshot.publisher_connection().map(|id| id.to_string()),
        viewers: snapshot.viewers.len(),
        connections: state.peers.len().await,
    })
}

/// `/ws` signaling, `/health`, and static assets from `webroot` for
/// everything else (`index.html` serves directory requests).
pub fn router(state: AppState, webroot: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/ws", get(signal::ws_handler))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(webroot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.iter().any(|origin| origin.trim() == "*") {
        return base.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect();
    if origins.is_empty() {
        return base;
    }
    base.allow_origin(AllowOrigin::list(origins))
}

//! Health check, hotspot read and social analysis endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::{ErrorContext, TidewatchError};
use crate::models::{AnalyzedPost, Hotspot, SocialPost};
use crate::publisher::HotspotPublisher;
use crate::social::SocialAnalyzer;

/// Shared handles for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<HotspotPublisher>,
    pub social: Arc<SocialAnalyzer>,
}

/// Build the router. Split out so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(health_handler))
        .route("/hotspots", get(hotspots_handler))
        .route("/social/analyze", post(analyze_social_handler))
        .with_state(state)
}

/// Start the HTTP server. Bind or serve failures are logged and end the server.
pub async fn start_health_server(port: u16, state: AppState) {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port = port, "Starting health check server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            TidewatchError::Config(format!("failed to bind health check port {}: {}", port, e))
                .log_with_context(&ErrorContext::new("start_health_server"));
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Health check server failed");
    }
}

/// Health check handler - returns 200 OK.
async fn health_handler() -> &'static str {
    "OK"
}

/// Current hotspots, descending by intensity.
async fn hotspots_handler(State(state): State<AppState>) -> Json<Vec<Hotspot>> {
    Json(state.publisher.current_hotspots().as_ref().clone())
}

/// Analyze the next batch of posts not seen before.
async fn analyze_social_handler(
    State(state): State<AppState>,
    Json(posts): Json<Vec<SocialPost>>,
) -> Json<Vec<AnalyzedPost>> {
    Json(state.social.analyze_batch(&posts).await)
}

/// Spawn the health check server as a background task.
pub fn spawn_health_server(port: u16, state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        start_health_server(port, state).await;
    })
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::Dispatcher;
use crate::channel::line::LineChannel;

/// Shared application state for the HTTP service.
pub struct AppState {
    pub channel_secret: String,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(channel_secret: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            channel_secret: channel_secret.into(),
            dispatcher,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create the axum Router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/webhook", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /: liveness text
async fn handle_root() -> &'static str {
    "Server is running!"
}

/// GET /health: Health check
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// POST /webhook: LINE Messaging API events.
///
/// Always answers 200 so LINE does not redeliver; rejected or malformed
/// payloads are logged and dropped.
async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!("LINE webhook received: {} bytes", body.len());

    let signature = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !LineChannel::verify_signature(&state.channel_secret, &body, signature) {
        warn!("Rejected LINE webhook with invalid signature");
        return StatusCode::OK;
    }

    let events = match LineChannel::parse_webhook_events(&body) {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to parse LINE webhook: {}", e);
            return StatusCode::OK;
        }
    };

    for event in &events {
        if let Err(e) = state.dispatcher.dispatch(&event.to_inbound()).await {
            error!("Failed to handle LINE event: {}", e);
        }
    }

    StatusCode::OK
}

/// Start the HTTP server on the given address and run until Ctrl-C or
/// SIGTERM.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

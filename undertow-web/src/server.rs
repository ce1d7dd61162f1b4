//! HTTP server wiring
//!
//! Routes, shared state and the serve loop. The server stops accepting
//! connections once the shutdown signal fires.

use std::error::Error;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use undertow_core::{RegistryHandle, ShutdownSignal, UndertowConfig};

use crate::handlers::{add_content, shutdown_server, status_all, stream_video};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub config: Arc<UndertowConfig>,
    pub shutdown: ShutdownSignal,
}

impl AppState {
    pub fn new(registry: RegistryHandle, config: UndertowConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            shutdown,
        }
    }
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_all))
        .route("/add", get(add_content))
        .route("/video", get(stream_video))
        .route("/shutdown", get(shutdown_server))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until the shutdown signal fires.
///
/// # Errors
///
/// - Binding the configured address fails
/// - The server loop fails
pub async fn run_server(state: AppState) -> Result<(), Box<dyn Error>> {
    let address = state.config.server.socket_addr();
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!("Undertow listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

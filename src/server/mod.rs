//! HTTP surface.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /` | export request, form-encoded or JSON ([`handler::export`]) |
//! | `GET <static prefix>/<file>` | saved exports, served from the save directory |
//! | `GET /health` | liveness check |
//!
//! Every request passes through `tower_http`'s `TraceLayer`; the body limit
//! applies to `POST /`.

pub mod handler;

use crate::export::Exporter;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub exporter: Arc<Exporter>,
}

/// Build the application router.
pub fn router(exporter: Arc<Exporter>, max_body_bytes: usize) -> Router {
    let config = exporter.config();
    let prefix = config.static_path_prefix.trim_end_matches('/').to_string();
    let saved_files = ServeDir::new(&config.save_dir);

    Router::new()
        .route("/", post(handler::export))
        .route("/health", get(handler::health))
        .nest_service(&prefix, saved_files)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { exporter })
}

/// Serve `app` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown signal received");
    }
}

//! Liveness endpoint
//!
//! A static probe for hosting platforms that keep a process alive only while
//! it answers HTTP. It deliberately reports nothing about the session: a bot
//! waiting out a reconnect backoff is still alive.
//!
//! ```yaml
//! livenessProbe:
//!   httpGet:
//!     path: /health/live
//!     port: 8080
//! ```

use std::future::Future;
use std::net::SocketAddr;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tower_http::trace::TraceLayer;

/// Body returned by every liveness route
pub const ALIVE: &str = "alive";

/// Create the liveness router
pub fn create_router() -> Router {
    Router::new()
        .route("/", get(liveness_probe))
        .route("/health/live", get(liveness_probe))
        .layer(TraceLayer::new_for_http())
}

async fn liveness_probe() -> impl IntoResponse {
    (StatusCode::OK, ALIVE)
}

/// Serve the liveness routes on `addr` until `shutdown` completes
pub async fn serve(
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Liveness endpoint listening");

    axum::serve(listener, create_router())
        .with_graceful_shutdown(shutdown)
        .await
}

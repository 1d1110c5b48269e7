pub mod config;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod router;
pub mod session;
pub mod state;
pub mod ws_bridge;

pub use error::{ServeError, SessionError};
pub use state::AppState;

use axum::{Router, http::Method, routing::get};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn build_router(state: AppState, ws_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    Router::new()
        .route(ws_path, get(ws_bridge::ws_bridge_handler))
        .route("/healthz", get(health::healthz))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind `config.server.bind` and serve until `shutdown` resolves.
pub async fn serve<F>(
    config: &config::ServerConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| ServeError::BindFailed(config.bind, e))?;
    let local = listener.local_addr()?;
    info!(addr = %local, ws_path = %config.ws_path, "websocket bridge listening");
    axum::serve(listener, build_router(state, &config.ws_path))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("websocket bridge stopped");
    Ok(())
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
}

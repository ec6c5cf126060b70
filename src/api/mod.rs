//! HTTP surface of the metrics hub
//!
//! Thin JSON layer over a [`MetricRepository`](crate::storage::MetricRepository);
//! every handler forwards to the backend and maps storage errors to status
//! codes through [`ApiError`].
//!
//! ## Endpoints
//!
//! - `GET /` - All stored metrics
//! - `GET /value/:name` - One metric by name
//! - `POST /update` - Create or merge one metric
//! - `POST /updates` - Apply a batch of metrics
//! - `GET /ping` - Storage health check

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Build the router with all routes attached
#[cfg(feature = "api")]
pub fn router(state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/", get(routes::metrics::list_metrics))
        .route("/value/:name", get(routes::metrics::get_metric))
        .route("/update", post(routes::metrics::update_metric))
        .route("/updates", post(routes::metrics::update_metrics))
        .route("/ping", get(routes::health::ping))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}

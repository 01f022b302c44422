use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::error::BenchError;
use crate::metrics::stream;
use crate::metrics::MetricsCollector;

/// Builds the `Router` exposing the live collector view.
pub fn create_router(metrics: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/api/metrics", get(stream::get_metrics))
        .route("/api/metrics/stream", get(stream::metrics_stream))
        .with_state(metrics)
        .layer(CorsLayer::permissive())
}

/// Bind `addr` and serve the live view in the background for the
/// lifetime of the run.
pub async fn spawn(
    addr: SocketAddr,
    metrics: Arc<MetricsCollector>,
) -> Result<(SocketAddr, JoinHandle<()>), BenchError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BenchError::Setup(format!("bind {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| BenchError::Setup(format!("bind {addr}: {e}")))?;

    let app = create_router(metrics);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!(error = %e, "metrics server exited");
        }
    });

    tracing::info!("live metrics at http://{local}/api/metrics (SSE: /api/metrics/stream)");
    Ok((local, handle))
}

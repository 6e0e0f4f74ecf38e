//! HTTP server for the Prometheus scrape endpoint.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;

use axum::{Json, Router};
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::negotiate::ResponseFormat;
use crate::registry::SharedRegistry;
use crate::scrape;

/// Body chunks buffered between the renderer and the connection.
const CHUNKS_IN_FLIGHT: usize = 16;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
}

/// Create the HTTP router.
pub fn create_router(registry: SharedRegistry, metrics_path: &str) -> Router {
    let state = AppState { registry };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/mapping", get(mapping_handler))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
///
/// The snapshot is rendered on the blocking pool and streamed to the client
/// as it is produced.
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let accept = headers.get(ACCEPT).and_then(|v| v.to_str().ok());
    let format = ResponseFormat::negotiate(accept);
    debug!(content_type = format.content_type(), "Sending response");

    let snapshot = state.registry.snapshot();
    let (tx, rx) = mpsc::channel(CHUNKS_IN_FLIGHT);
    let error_tx = tx.clone();

    tokio::task::spawn_blocking(move || {
        match scrape::render(&snapshot, format, ChannelSink { tx }) {
            Ok(summary) => debug!(
                families = summary.families_written,
                failed = summary.families_failed,
                bytes = summary.bytes_written,
                "Response complete"
            ),
            Err(e) => {
                info!(error = %e, "Error during response processing");
                // Abort the body so the client never mistakes it for complete
                let _ = error_tx.blocking_send(Err(io::Error::other(e.to_string())));
            }
        }
    });

    (
        StatusCode::OK,
        [(CONTENT_TYPE, format.content_type())],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

#[derive(Debug, Deserialize)]
struct MappingQuery {
    name: String,
}

#[derive(Debug, Serialize)]
struct MappingResponse {
    name: String,
    labels: BTreeMap<String, String>,
}

/// Handler for the /mapping endpoint: how a raw metric name would be exported.
async fn mapping_handler(
    State(state): State<AppState>,
    Query(query): Query<MappingQuery>,
) -> Response {
    let name = state.registry.mapped_name(&query.name);
    let labels = state.registry.mapped_labels(&query.name);

    match (name, labels) {
        (Some(name), Some(labels)) => Json(MappingResponse {
            name,
            labels: labels.into_iter().collect(),
        })
        .into_response(),
        _ => (StatusCode::NOT_FOUND, "not exported\n").into_response(),
    }
}

/// Blocking writer feeding a streamed response body.
struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl io::Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    registry: SharedRegistry,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(registry: SharedRegistry, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            registry,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.registry, &self.metrics_path);

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

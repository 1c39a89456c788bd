//! # Queue Bridge HTTP Service
//!
//! HTTP front end for the producer process.
//!
//! This service provides:
//! - `POST /createMessages` to enqueue a batch of numbered messages
//! - `POST /clearMessages` to drain the queue within a bounded deadline
//! - `GET /health` for liveness probes

pub mod errors;

pub use errors::{ApiError, ServiceError};

use axum::{
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use queue_bridge_core::{
    cancel_on_shutdown, BridgeConfig, CancellationSignal, DrainService, ProducerService,
    QueueProviderKind,
};
use serde::{Deserialize, Serialize};
use std::{future::IntoFuture, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
///
/// The producer and the drain service each hold their own client handle, so a
/// drain in progress never shares a connection with concurrent sends.
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<BridgeConfig>,

    /// Enqueues messages for `/createMessages`
    pub producer: Arc<ProducerService>,

    /// Empties the queue for `/clearMessages`
    pub drain: Arc<DrainService>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: BridgeConfig, producer: ProducerService, drain: DrainService) -> Self {
        Self {
            config: Arc::new(config),
            producer: Arc::new(producer),
            drain: Arc::new(drain),
        }
    }
}

// ============================================================================
// Request and Response Types
// ============================================================================

/// Body of `POST /createMessages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessagesRequest {
    pub count: u32,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue: String,
    pub provider: QueueProviderKind,
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_body_size;

    let queue_routes = Router::new()
        .route("/createMessages", post(handle_create_messages))
        .route("/clearMessages", post(handle_clear_messages));

    let health_routes = Router::new().route("/health", get(handle_health_check));

    Router::new()
        .merge(queue_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_body_size))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server and run until SIGTERM or Ctrl+C
pub async fn start_server(state: AppState) -> Result<(), ServiceError> {
    let address = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!("Starting HTTP server on {}", address);

    let shutdown = CancellationSignal::new();
    let watcher = cancel_on_shutdown(shutdown.clone());
    let result = serve_until(listener, state, shutdown).await;
    watcher.abort();

    result
}

/// Serve on an already bound listener until `shutdown` is set.
///
/// New connections stop as soon as the signal is set. In-flight requests get
/// `server.shutdown_timeout_seconds` to finish before the server gives up on
/// them.
pub async fn serve_until(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationSignal,
) -> Result<(), ServiceError> {
    let shutdown_timeout = Duration::from_secs(state.config.server.shutdown_timeout_seconds);
    let app = create_router(state);

    let graceful = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .into_future();

    let forced = async {
        shutdown.cancelled().await;
        info!(
            "Shutdown requested, allowing {}s for in-flight requests",
            shutdown_timeout.as_secs()
        );
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = forced => {
            warn!("In-flight requests did not finish within the shutdown timeout");
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Enqueue `count` numbered messages.
///
/// Sends are sequential and not transactional: when message `k` fails, the
/// first `k - 1` stay on the queue and the error body reports how many made it.
/// A body that cannot be read, including one over `server.max_body_size`, is
/// rejected like malformed JSON.
#[instrument(skip(state, body))]
pub async fn handle_create_messages(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<String, ApiError> {
    let body = body.map_err(|e| ApiError::InvalidBody {
        message: e.body_text(),
    })?;
    let request: CreateMessagesRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody {
            message: e.to_string(),
        })?;

    info!(count = request.count, queue = %state.producer.queue(), "Creating messages");

    let report = state.producer.enqueue(request.count).await?;

    Ok(format!(
        "Successfully sent {} messages to queue.\n",
        report.sent
    ))
}

/// Drain the queue until it stays empty or the drain deadline passes
#[instrument(skip(state))]
pub async fn handle_clear_messages(State(state): State<AppState>) -> Result<String, ApiError> {
    info!("Clearing messages");

    let report = state.drain.drain().await?;

    info!(
        acknowledged = report.acknowledged,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Queue cleared"
    );

    Ok("Successfully cleared all messages from queue.\n".to_string())
}

/// Liveness probe; does not touch the broker
#[instrument(skip(state))]
pub async fn handle_health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        queue: state.producer.queue().as_str().to_string(),
        provider: state.config.queue.provider,
    })
}

//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use queue_bridge_core::{BridgeConfigError, DrainError, EnqueueError};
use tracing::{error, warn};

/// Handler errors with HTTP status code mapping
///
/// Bodies are short plain-text lines, the same register as the success
/// responses:
///
/// - `400 Bad Request`: the request body could not be understood
/// - `500 Internal Server Error`: the broker rejected a send or a drain failed
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Body was not `{"count": <non-negative integer>}`
    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    /// Sending stopped part way; earlier messages stay enqueued
    #[error("Error sending message: {0}")]
    Enqueue(#[from] EnqueueError),

    /// Drain ended on a fatal receive or acknowledge error
    #[error("Error clearing messages: {0}")]
    Drain(#[from] DrainError),
}

impl ApiError {
    /// Status code reported to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::Enqueue(_) | Self::Drain(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::InvalidBody { message } => {
                warn!(error = %message, "Rejected malformed request body");
                "Invalid request body\n".to_string()
            }
            Self::Enqueue(e) => {
                error!(sent = e.sent(), error = %e, "Enqueue failed");
                format!("{}\n", self)
            }
            Self::Drain(e) => {
                error!(acknowledged = e.acknowledged(), error = %e, "Drain failed");
                format!("{}\n", self)
            }
        };

        (status, body).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] BridgeConfigError),
}

//! # Error Handling
//!
//! Error types for the bridge and how they surface at the HTTP boundary.
//!
//! ## Error Categories:
//! - **Transport**: either WebSocket leg failed (connect, read, write)
//! - **Protocol**: a frame could not be parsed or built
//! - **Payload**: base64 audio could not be decoded
//! - **Capacity**: the concurrent call limit was reached
//! - **Function**: an external function execution failed
//!
//! ## Propagation:
//! Errors never cross call boundaries. Inside one call they are caught at the
//! dispatch boundary, logged, and turned into call teardown where needed.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors raised while bridging a call.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A WebSocket leg failed to connect, read or write
    #[error("Transport error: {0}")]
    Transport(String),

    /// A protocol frame was malformed or could not be encoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Base64 audio payload could not be decoded
    #[error("Payload error: {0}")]
    Payload(#[from] base64::DecodeError),

    /// The process is already serving the maximum number of calls
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// External function execution failed
    #[error("Function execution failed: {0}")]
    Function(String),
}

impl BridgeError {
    /// Machine-readable error code used in logs and HTTP responses.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Transport(_) => "transport_error",
            BridgeError::Protocol(_) => "protocol_error",
            BridgeError::Payload(_) => "payload_error",
            BridgeError::Capacity(_) => "capacity_exceeded",
            BridgeError::Function(_) => "function_error",
        }
    }
}

/// Conversion of bridge errors into HTTP responses.
///
/// Only the WebSocket upgrade route can return these, and in practice only a
/// capacity failure reaches this far.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "capacity_exceeded",
///     "message": "Capacity exceeded: 10 calls already active",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for BridgeError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            BridgeError::Capacity(_) => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Protocol(_) | BridgeError::Payload(_) => {
                actix_web::http::StatusCode::BAD_REQUEST
            }
            _ => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.code(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

/// Shorthand for results carrying a [`BridgeError`].
pub type BridgeResult<T> = Result<T, BridgeError>;

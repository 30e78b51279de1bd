//! HTTP handler definitions for the `SiteLens` server.
//!
//! Defines `AppState` (shared state carried through axum extractors), the
//! JSON error type, and re-exports every handler for router assembly.

pub mod classify;
pub mod events;
pub mod health;

pub use classify::{classify_async_handler, classify_handler, observe_handler};
pub use events::events_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::{NetworkConfig, ShutdownController};
use crate::rpc::RpcError;
use crate::service::ClassificationService;

/// Shared application state passed to all handlers via `State` extraction.
///
/// Holds `Arc` references so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ClassificationService>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// JSON error body: `{"error": "<kind>", "message": "<text>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RpcError> for ApiError {
    fn from(error: RpcError) -> Self {
        let status = match &error {
            RpcError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RpcError::Publish { .. } | RpcError::Connection { .. } => StatusCode::BAD_GATEWAY,
            RpcError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            RpcError::DuplicateToken { .. } | RpcError::MalformedReply { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

//! Error types for the monitor

use std::time::Duration;
use thiserror::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Upstream failures are reported per cycle and never abort it.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MonitorError::Http(_) | MonitorError::Rpc(_) | MonitorError::Timeout { .. }
        )
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            MonitorError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            MonitorError::Http(_) => (StatusCode::BAD_GATEWAY, "Upstream HTTP error"),
            MonitorError::Rpc(_) => (StatusCode::BAD_GATEWAY, "RPC error"),
            MonitorError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "Upstream timeout"),
            MonitorError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error"),
            MonitorError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error"),
            MonitorError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO error"),
            MonitorError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
            MonitorError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input"),
            MonitorError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

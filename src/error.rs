use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::power::SystemState;

/// Faults raised by a capture backend.
///
/// These stay opaque to callers above the device layer; the coordinator only
/// distinguishes "device not ready" from everything else.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not initialized")]
    NotReady,

    #[error("Failed to open device [{device}]: {reason}")]
    Open { device: String, reason: String },

    #[error("Unsupported configuration: {0}")]
    Configure(String),

    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Device initialization failed: {0}")]
    DeviceInitFailure(String),

    #[error("Device busy: held by {holder}, gave up after {}ms", timeout.as_millis())]
    ResourceBusy {
        holder: &'static str,
        timeout: Duration,
    },

    #[error("Capture failed: {0}")]
    CaptureFailure(String),

    #[error("Stream failed: {0}")]
    StreamFailure(String),

    #[error("System is powered off")]
    PoweredOff,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: SystemState, to: SystemState },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Indicator error [{name}]: {reason}")]
    Indicator { name: String, reason: String },

    #[error("Power control failed: {0}")]
    PowerControl(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body (unified success format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ResourceBusy { .. } | AppError::PoweredOff => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure was caused by lock contention rather than a fault
    pub fn is_busy(&self) -> bool {
        matches!(self, AppError::ResourceBusy { .. })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(
                error_type = std::any::type_name_of_val(&self),
                error_message = %body.message,
                "Request failed"
            );
        } else {
            tracing::debug!(error_message = %body.message, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::ResourceBusy {
                holder: "stream",
                timeout: Duration::from_secs(2)
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::CaptureFailure("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_busy_message() {
        let err = AppError::ResourceBusy {
            holder: "capture",
            timeout: Duration::from_millis(2000),
        };
        assert!(err.is_busy());
        assert_eq!(
            err.to_string(),
            "Device busy: held by capture, gave up after 2000ms"
        );
    }
}

//! HTTP-facing error type.
//!
//! Every handler returns `Result<_, ApiError>`. The response body is always
//! `{"error": <message>, "kind": <kind>}` where `kind` is a stable snake_case
//! identifier clients can match on. Internal details (converter output,
//! provider bodies, io errors) are logged but never returned.

use crate::convert::ConversionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Multipart body had no `file` field.
    #[error("No file provided")]
    MissingFile,

    /// A required request field was absent or empty.
    #[error("Missing required parameter: {name}")]
    MissingParameter { name: &'static str },

    /// Target format is not one of pdf, docx, pptx.
    #[error("Unsupported output format: {format}")]
    UnsupportedFormat { format: String },

    /// Request body was malformed.
    #[error("{message}")]
    Validation { message: String },

    /// Request body exceeded the configured upload limit.
    #[error("Upload exceeds the maximum allowed size")]
    PayloadTooLarge,

    /// The named upload does not exist (never uploaded, or already converted).
    #[error("Input file not found: {file}")]
    InputNotFound { file: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Model provider call failed.
    #[error("Chat provider error: {0:#}")]
    Chat(anyhow::Error),

    /// Local filesystem access failed.
    #[error("Failed to {operation}: {source}")]
    Storage {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::MissingParameter { .. }
            | ApiError::UnsupportedFormat { .. }
            | ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::InputNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conversion(ConversionError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Conversion(_) | ApiError::Chat(_) | ApiError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::MissingFile => "missing_file",
            ApiError::MissingParameter { .. } => "missing_parameter",
            ApiError::UnsupportedFormat { .. } => "unsupported_format",
            ApiError::Validation { .. } => "validation",
            ApiError::InputNotFound { .. } => "input_not_found",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::Conversion(ConversionError::Timeout { .. }) => "conversion_timeout",
            ApiError::Conversion(_) => "conversion",
            ApiError::Chat(_) => "chat",
            ApiError::Storage { .. } => "storage",
        }
    }

    /// Message safe to show to the client.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Conversion(ConversionError::Timeout { secs, .. }) => {
                format!("Conversion timed out after {}s", secs)
            }
            ApiError::Conversion(_) => "Error converting file".to_string(),
            ApiError::Chat(_) => "Error processing your request".to_string(),
            ApiError::Storage { .. } => "Error storing file".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{} ({}): {:#}", status, self.kind(), self);
        } else {
            tracing::warn!("{} ({}): {}", status, self.kind(), self);
        }

        let body = ErrorBody {
            error: self.user_message(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

//! Error type for the chart-exporter library.
//!
//! Every failure an export can hit is one variant of [`ExportError`]. The
//! variants fall into three groups, and the HTTP layer treats them
//! differently:
//!
//! * **Request errors** ([`MalformedRequest`](ExportError::MalformedRequest),
//!   [`UnsupportedFormat`](ExportError::UnsupportedFormat),
//!   [`InvalidDimensions`](ExportError::InvalidDimensions)) are detected while
//!   normalising the form body, before any subprocess runs. They always become
//!   a 4xx response.
//!
//! * **Conversion errors** ([`ConversionFailure`](ExportError::ConversionFailure),
//!   [`ConverterTimedOut`](ExportError::ConverterTimedOut),
//!   [`ToolNotFound`](ExportError::ToolNotFound)) come from the external
//!   converters.
//!
//! * **Filesystem errors** ([`Filesystem`](ExportError::Filesystem)) come from
//!   scratch or save-directory writes.
//!
//! For the `save` action, conversion and filesystem errors are reported in the
//! status payload (`statuscode=0`) rather than as an HTTP error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the chart-exporter library.
#[derive(Debug, Error)]
pub enum ExportError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The form body or its `parameters` field could not be decoded.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// `exportformat` is not one of png, jpeg, jpg, pdf, svg.
    #[error("Unsupported export format '{0}' (expected one of: png, jpeg, jpg, pdf, svg)")]
    UnsupportedFormat(String),

    /// `meta_width` / `meta_height` is not a positive finite number.
    #[error("Invalid {field} '{value}': must be a positive number")]
    InvalidDimensions { field: &'static str, value: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// A converter exited unsuccessfully or produced no output.
    #[error("{tool} failed: {detail}")]
    ConversionFailure { tool: &'static str, detail: String },

    /// A converter did not finish within the configured timeout.
    #[error("{tool} did not finish within {secs}s")]
    ConverterTimedOut { tool: &'static str, secs: u64 },

    /// A converter binary could not be found.
    #[error("Converter not available: {0}")]
    ToolNotFound(String),

    // ── Filesystem errors ─────────────────────────────────────────────────
    /// Scratch or save-directory I/O failed.
    #[error("Filesystem error at '{path}': {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or settings validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExportError {
    /// Shorthand for wrapping an I/O error with the path it concerns.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "MalformedRequest",
            Self::UnsupportedFormat(_) => "UnsupportedFormat",
            Self::InvalidDimensions { .. } => "InvalidDimensions",
            Self::ConversionFailure { .. } | Self::ConverterTimedOut { .. } => {
                "ConversionFailure"
            }
            Self::ToolNotFound(_) => "ToolNotFound",
            Self::Filesystem { .. } => "FilesystemError",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::Internal(_) => "InternalError",
        }
    }

    /// True for errors caused by the request itself rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_) | Self::UnsupportedFormat(_) | Self::InvalidDimensions { .. }
        )
    }

    /// HTTP status used when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) | Self::InvalidDimensions { .. } => StatusCode::BAD_REQUEST,
            Self::UnsupportedFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConversionFailure { .. } | Self::ConverterTimedOut { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::ToolNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Filesystem { .. } | Self::InvalidConfig(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Export failed: {}", self);
        } else {
            tracing::debug!("Rejected export request: {}", self);
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

//! Error handling for the checkpoint tracker

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::payload_builder::ValidationError;
use crate::vision::DeviceError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid asset identifier / checkpoint id
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed request (missing multipart field, bad form data)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Uploaded bytes are not a readable image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Camera could not be opened or read
    #[error("Device failure: {0}")]
    Device(#[from] DeviceError),

    /// QR symbol could not be encoded
    #[error("QR encode error: {0}")]
    QrEncode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Error::InvalidImage(_) => (StatusCode::BAD_REQUEST, "INVALID_IMAGE"),
            Error::QrEncode(_) => (StatusCode::BAD_REQUEST, "QR_ENCODE_ERROR"),
            Error::Device(_) => (StatusCode::SERVICE_UNAVAILABLE, "DEVICE_FAILURE"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for Error {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Error::InvalidRequest(e.body_text())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

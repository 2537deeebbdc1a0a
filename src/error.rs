use std::time::Duration;

use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Credential failures raised by the auth gate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("API key required")]
    Missing,

    #[error("Invalid API key")]
    Invalid,
}

/// A client exhausted its request budget for the current window.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Rate limit of {limit} requests per window exceeded")]
pub struct RateLimitError {
    /// Configured requests per window
    pub limit: u32,
    /// Time until the client's window resets
    pub retry_after: Duration,
}

impl RateLimitError {
    /// Whole seconds for the `Retry-After` header, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

/// Payload size violations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeError {
    /// Encoded request body over the limit (checked before decoding).
    #[error("Request body exceeds maximum of {max} bytes")]
    PayloadTooLarge { max: usize },

    /// Decoded image bytes over the limit.
    #[error("Decoded image of {size} bytes exceeds maximum of {max} bytes")]
    ImageTooLarge { size: usize, max: usize },

    /// Body without a declared length that grew past the limit while read.
    #[error("Request body exceeds the configured limit")]
    BodyLimitExceeded,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormatError {
    #[error("Image data is not valid base64")]
    InvalidBase64,

    #[error("Image format not supported; expected JPEG, PNG, GIF or WEBP")]
    InvalidFormat,
}

/// Face detection outcomes that prevent producing an embedding.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceError {
    #[error("No face detected in image")]
    NoFaceDetected,

    #[error("Multiple faces detected ({count}); at most {max} allowed")]
    TooManyFaces { count: usize, max: usize },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Invalid inputs to embedding verification.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ShapeError {
    #[error("Embeddings must both have {expected} dimensions, got {left} and {right}")]
    LengthMismatch {
        expected: usize,
        left: usize,
        right: usize,
    },

    #[error("Embedding has zero magnitude")]
    DegenerateVector,

    #[error("Threshold {0} must be between 0.0 and 1.0")]
    InvalidThreshold(f64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("{name} out of range: {reason}")]
    OutOfRange { name: String, reason: String },
}

/// Application-wide error type.
///
/// Each variant maps to exactly one HTTP status in [`AppError::status`];
/// `IntoResponse` is the only place errors become responses.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error(transparent)]
    ImageFormat(#[from] ImageFormatError),

    #[error(transparent)]
    Face(#[from] FaceError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Size(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ImageFormat(_) | AppError::Shape(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Face(FaceError::DimensionMismatch { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Face(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code for the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Auth(AuthError::Missing) => "missing_api_key",
            AppError::Auth(AuthError::Invalid) => "invalid_api_key",
            AppError::RateLimited(_) => "rate_limit_exceeded",
            AppError::Size(_) => "payload_too_large",
            AppError::ImageFormat(ImageFormatError::InvalidBase64) => "invalid_base64",
            AppError::ImageFormat(ImageFormatError::InvalidFormat) => "invalid_image_format",
            AppError::Face(FaceError::NoFaceDetected) => "no_face_detected",
            AppError::Face(FaceError::TooManyFaces { .. }) => "too_many_faces",
            AppError::Face(FaceError::DimensionMismatch { .. }) => "dimension_mismatch",
            AppError::Shape(ShapeError::LengthMismatch { .. }) => "length_mismatch",
            AppError::Shape(ShapeError::DegenerateVector) => "degenerate_vector",
            AppError::Shape(ShapeError::InvalidThreshold(_)) => "invalid_threshold",
            AppError::Config(_) => "config_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unexpected(_) => "internal_error",
        }
    }

    /// Client-facing detail. Server-side faults never expose their cause.
    fn detail(&self) -> String {
        match self {
            AppError::Face(FaceError::DimensionMismatch { .. }) => {
                "Face embedding model returned an unexpected result.".to_string()
            }
            AppError::Config(_) => "Service configuration error. Please contact support.".to_string(),
            AppError::Unexpected(_) => "Failed to process request.".to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Error response body for API endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::warn!(error = %self, code = self.code(), "Request rejected");
        }

        let body = ErrorResponse {
            error: self.code().to_string(),
            detail: self.detail(),
        };

        let mut response = (status, axum::Json(body)).into_response();
        let headers = response.headers_mut();
        match &self {
            AppError::RateLimited(e) => {
                headers.insert(RETRY_AFTER, HeaderValue::from(e.retry_after_secs()));
                headers.insert("x-ratelimit-limit", HeaderValue::from(e.limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            }
            AppError::Auth(_) => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("API-Key"));
            }
            _ => {}
        }
        response
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
pub fn sanitize_serde_error(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

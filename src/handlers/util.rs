//! Shared utilities for handlers.

use axum::extract::FromRequest;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;

use crate::error::{AppError, SizeError, sanitize_serde_error};

/// JSON body extractor whose rejections go through [`AppError`].
///
/// Malformed or mistyped bodies become `400 bad_request` with a sanitized
/// message; bodies cut off by the body limit become `413`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::Size(SizeError::BodyLimitExceeded);
        }
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                AppError::BadRequest("Expected Content-Type: application/json".to_string())
            }
            other => AppError::BadRequest(sanitize_serde_error(&other.body_text())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        #[allow(dead_code)]
        image_data: String,
    }

    async fn extract(content_type: Option<&str>, body: &'static str) -> Result<JsonBody<Payload>, AppError> {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        let req = builder.body(Body::from(body)).unwrap();
        JsonBody::<Payload>::from_request(req, &()).await
    }

    #[tokio::test]
    async fn test_valid_body() {
        assert!(extract(Some("application/json"), r#"{"image_data":"abc"}"#).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let err = extract(Some("application/json"), "{}").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid request: Missing required field: image_data");
    }

    #[tokio::test]
    async fn test_syntax_error_is_bad_request() {
        let err = extract(Some("application/json"), "{not json").await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[tokio::test]
    async fn test_missing_content_type_is_bad_request() {
        let err = extract(None, r#"{"image_data":"abc"}"#).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Serialize, Serializer};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ErrorResponse>;

/// Uniform failure value of every fallible storage operation.
///
/// The status code doubles as the error kind: `400` is a malformed location, `404` a missing path,
/// `507` an exceeded quota and `500` an underlying I/O failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{status}: {message}")]
pub struct ErrorResponse {
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn insufficient_storage(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INSUFFICIENT_STORAGE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn is_bad_request(&self) -> bool {
        self.status == StatusCode::BAD_REQUEST
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn is_insufficient_storage(&self) -> bool {
        self.status == StatusCode::INSUFFICIENT_STORAGE
    }

    pub fn is_io_failure(&self) -> bool {
        self.status == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<io::Error> for ErrorResponse {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::internal(format!("IO error: {err}")),
        }
    }
}

impl From<tokio::task::JoinError> for ErrorResponse {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("blocking task failed: {err}"))
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        tracing::error!("Generating response for storage error: {:?}", self);

        let body = json!({
            "status": self.status.as_u16(),
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

fn serialize_status<S: Serializer>(
    status: &StatusCode,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u16(status.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err: ErrorResponse = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());

        let err: ErrorResponse = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(err.is_io_failure());
        assert!(err.message.contains("denied"));
    }

    #[test]
    fn serializes_status_as_number() {
        let err = ErrorResponse::insufficient_storage("quota exceeded");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["status"], 507);
        assert_eq!(value["message"], "quota exceeded");
    }

    #[tokio::test]
    async fn renders_json_response() {
        let response = ErrorResponse::not_found("releases/1.0.0/app.jar").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], 404);
        assert_eq!(value["message"], "releases/1.0.0/app.jar");
    }
}

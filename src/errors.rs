use crate::services::{
    auth::AuthError,
    upload_service::{ErrorClass, UploadError},
    video_store::VideoStoreError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl ErrorClass {
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::UpstreamToolFailure | Self::StorageFailure | Self::MetadataFailure => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        // Oversize bodies are a client error but keep their dedicated status.
        let status = match err {
            UploadError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => err.class().status(),
        };
        AppError::new(status, err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        tracing::debug!(error = %err, "rejected credentials");
        AppError::new(ErrorClass::Unauthorized.status(), "Couldn't validate JWT")
    }
}

impl From<VideoStoreError> for AppError {
    fn from(err: VideoStoreError) -> Self {
        match err {
            VideoStoreError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            other => {
                tracing::error!(error = ?other, "metadata store failure");
                AppError::internal("failed to access video metadata")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_map_to_statuses() {
        let cases = [
            (UploadError::PayloadTooLarge { limit: 1 }, 413),
            (UploadError::MissingFile("video"), 400),
            (UploadError::UnsupportedMediaType("video/avi".into()), 400),
            (UploadError::Forbidden, 403),
            (UploadError::VideoNotFound(uuid::Uuid::nil()), 404),
            (UploadError::NoStreamsFound, 500),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status.as_u16(), status);
        }
    }

    #[test]
    fn auth_errors_are_unauthorized() {
        let err = AppError::from(AuthError::MissingToken);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}

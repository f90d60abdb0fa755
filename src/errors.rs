use crate::services::listing_service::ListingError;
use axum::{
    Json,
    extract::multipart::MultipartError,
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

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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

impl From<ListingError> for AppError {
    fn from(err: ListingError) -> Self {
        match &err {
            ListingError::Validation(_) => AppError::bad_request(err.to_string()),
            ListingError::NotFound(_) => AppError::not_found(err.to_string()),
            ListingError::RemoteStore(_)
            | ListingError::Persistence(_)
            | ListingError::Timeout { .. } => {
                tracing::error!(error = %err, "listing operation failed");
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!(error = %err, "i/o failure while handling request");
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::media_store::MediaStoreError;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn listing_errors_map_to_stable_statuses() {
        let cases = [
            (ListingError::Validation("city is required".into()), StatusCode::BAD_REQUEST),
            (ListingError::NotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                ListingError::RemoteStore(MediaStoreError::UploadFailed("quota".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ListingError::Timeout {
                    operation: "media upload",
                    after: Duration::from_secs(1),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = AppError::from(ListingError::Validation("city is required".into()));
        assert_eq!(err.message, "city is required");
    }
}

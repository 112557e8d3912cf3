use crate::{
    services::image_service::ServiceError,
    stores::{StoreError, local_objects::BlobError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// An HTTP-facing error: status, a short `message`, and optionally the
/// underlying cause reported as `error`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            detail: None,
        }
    }

    /// Attach the underlying cause, reported as `error` in the body.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.message, detail),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.detail {
            Some(detail) => json!({ "message": self.message, "error": detail }),
            None => json!({ "message": self.message }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::BadRequest(msg) => AppError::bad_request(msg),
            ServiceError::NotFound(msg) => AppError::not_found(msg),
            ServiceError::Store { context, source } => {
                tracing::error!("{}: {}", context, source);
                AppError::internal(context).with_detail(source.to_string())
            }
        }
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Expired => AppError::forbidden("Request has expired"),
            BlobError::SignatureMismatch => AppError::forbidden("Signature does not match"),
            BlobError::NotFound(_) => AppError::not_found("Object not found"),
            BlobError::Store(StoreError::InvalidObjectKey(key)) => {
                AppError::bad_request("Invalid object key").with_detail(key)
            }
            BlobError::Store(source) => {
                tracing::error!("blob transfer failed: {}", source);
                AppError::internal("Blob transfer failed").with_detail(source.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_status_codes() {
        let cases = [
            (ServiceError::BadRequest("Invalid JSON".into()), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("Image not found".into()), StatusCode::NOT_FOUND),
            (
                ServiceError::Store {
                    context: "Failed to fetch image",
                    source: StoreError::Backend("timeout".into()),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn store_failures_keep_context_and_cause() {
        let err = AppError::from(ServiceError::Store {
            context: "Failed to delete image",
            source: StoreError::Backend("throttled".into()),
        });
        assert_eq!(err.message, "Failed to delete image");
        assert_eq!(err.detail.as_deref(), Some("throttled"));
        assert_eq!(err.to_string(), "Failed to delete image: throttled");
    }

    #[test]
    fn blob_errors_map_to_status_codes() {
        assert_eq!(AppError::from(BlobError::Expired).status, StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(BlobError::SignatureMismatch).message,
            "Signature does not match"
        );
        assert_eq!(
            AppError::from(BlobError::NotFound("k".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(BlobError::Store(StoreError::InvalidObjectKey("..".into()))).status,
            StatusCode::BAD_REQUEST
        );
    }
}

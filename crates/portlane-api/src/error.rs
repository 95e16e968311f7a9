//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::webhook::WebhookError;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<portlane_core::Error> for ApiError {
    fn from(err: portlane_core::Error) -> Self {
        match err {
            portlane_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            portlane_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlane_core::Error;

    fn status(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_core_error_status_codes() {
        assert_eq!(status(Error::NotFound("job".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::InvalidInput("bad id".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(Error::ExecutionFailed("make".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(std::io::Error::other("disk full").into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

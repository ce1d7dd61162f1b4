//! API error types and their HTTP mapping.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use undertow_core::{EngineError, InfoHash, MagnetError, RegistryError};

use crate::handlers::range::RangeError;

/// Errors surfaced by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing link parameter")]
    MissingLink,

    #[error(transparent)]
    InvalidLink(#[from] MagnetError),

    #[error("Content {info_hash} is unavailable")]
    Unavailable { info_hash: InfoHash },

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Stream failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to build response: {0}")]
    BuildResponse(#[from] axum::http::Error),
}

impl ApiError {
    /// Status code the error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingLink | ApiError::InvalidLink(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable { .. } => StatusCode::NOT_FOUND,
            ApiError::Range(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Registry(RegistryError::StartFailed { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Registry(RegistryError::Stopped) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(EngineError::InvalidRange { .. }) => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            // Session was torn down between attach and read
            ApiError::Engine(EngineError::Stopped) => StatusCode::NOT_FOUND,
            ApiError::Engine(_) | ApiError::BuildResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        } else {
            tracing::debug!("Request rejected: {self}");
        }

        let unsatisfied_length = match &self {
            ApiError::Range(error) => Some(error.length()),
            ApiError::Engine(EngineError::InvalidRange { length, .. }) => Some(*length),
            _ => None,
        };

        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let Some(length) = unsatisfied_length {
            let value = HeaderValue::from_str(&format!("bytes */{length}"));
            if let Ok(value) = value {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::MissingLink.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Unavailable {
                info_hash: InfoHash::new([0; 20])
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Registry(RegistryError::Stopped).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Engine(EngineError::Stopped).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_range_error_carries_content_range() {
        let error = ApiError::Range(RangeError::Unsatisfiable {
            header: "bytes=5000-".to_string(),
            length: 1000,
        });
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */1000"
        );
    }
}

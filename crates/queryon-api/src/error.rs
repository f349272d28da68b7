// HTTP error mapping for the error taxonomy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use queryon_core::QueryonError;

/// Wrapper that maps core errors onto HTTP responses
pub struct ApiError(pub QueryonError);

impl From<QueryonError> for ApiError {
    fn from(e: QueryonError) -> Self {
        ApiError(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(QueryonError::Internal(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueryonError::Validation(_) => StatusCode::BAD_REQUEST,
            QueryonError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            QueryonError::Forbidden(_) => StatusCode::FORBIDDEN,
            QueryonError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryonError::Conflict(_) => StatusCode::CONFLICT,
            QueryonError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            QueryonError::ExternalService(_) | QueryonError::Timeout(_) => StatusCode::BAD_GATEWAY,
            QueryonError::Configuration(_)
            | QueryonError::Storage(_)
            | QueryonError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        (status, Json(json!({"detail": self.0.to_string()}))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

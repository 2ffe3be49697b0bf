use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;

use kindred_gateway::RealtimeError;

/// HTTP face of a failed request. Rendered as
/// `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    MissingToken,

    /// The request body, path or query string could not be parsed.
    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingToken => StatusCode::UNAUTHORIZED,
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::Realtime(e) => match e {
                RealtimeError::Unauthenticated => StatusCode::UNAUTHORIZED,
                RealtimeError::Unauthorized(_) => StatusCode::FORBIDDEN,
                RealtimeError::NotFound(_) => StatusCode::NOT_FOUND,
                RealtimeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                RealtimeError::Conflict(_) => StatusCode::CONFLICT,
                RealtimeError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                RealtimeError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                RealtimeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::MissingToken => "unauthenticated",
            ApiError::Malformed(_) => "invalid_input",
            ApiError::Realtime(e) => e.code(),
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::MissingToken | ApiError::Malformed(_) => self.to_string(),
            ApiError::Realtime(e) => e.public_message(),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message: self.public_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

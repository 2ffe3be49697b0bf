use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use kindred_types::events::ServerFrame;

/// Failure of a realtime operation. Each variant maps onto one stable error
/// code that is sent to clients in `error` frames and HTTP error bodies.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conflict(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    Transient(String),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl RealtimeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Conflict(_) => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Storage(_) => "internal",
        }
    }

    /// Message safe to show a client. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::error(self.code(), self.public_message())
    }
}

/// Logs a refused access attempt on the audit target and builds the error.
pub(crate) fn denied(
    reason: &'static str,
    user_id: Uuid,
    target_id: Option<Uuid>,
    match_id: Option<Uuid>,
) -> RealtimeError {
    warn!(
        target: "kindred::audit",
        user_id = %user_id,
        target_id = ?target_id,
        match_id = ?match_id,
        "denied: {}",
        reason
    );
    RealtimeError::Unauthorized(reason)
}

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use kindred_gateway::RealtimeError;
use kindred_gateway::delivery::{Delivery, OutgoingMessage};
use kindred_types::api::{HistoryQuery, ReadReceiptResponse, SendMessageRequest, SendMessageResponse};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// HTTP sends are deduplicated: a retry inside a duplicate window gets the
/// earlier message back with `200` instead of `201`.
pub async fn send_message(
    State(state): State<AppState>,
    ApiPath(match_id): ApiPath<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outgoing = OutgoingMessage {
        match_id,
        receiver_id: req.receiver_id,
        content: req.content,
        kind: req.kind,
        reply_to_id: req.reply_to_id,
    };

    let delivery = state.gateway.send_message(user_id, outgoing, true).await?;
    let status = match delivery {
        Delivery::Created(_) => StatusCode::CREATED,
        Delivery::Duplicate { .. } => StatusCode::OK,
    };
    let duplicate_of = delivery.duplicate_reason().map(|r| r.as_str());
    let message = match delivery {
        Delivery::Created(message) | Delivery::Duplicate { message, .. } => message,
    };

    Ok((status, Json(SendMessageResponse { message, duplicate_of })))
}

pub async fn get_history(
    State(state): State<AppState>,
    ApiPath(match_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .gateway
        .conversation_history(user_id, match_id, query.limit)
        .await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.gateway.mark_read(user_id, message_id).await?;
    let read_at = message
        .read_at
        .ok_or_else(|| RealtimeError::Storage(anyhow::anyhow!("message {} has no read stamp", message_id)))?;
    Ok(Json(ReadReceiptResponse { message_id, read_at }))
}

pub async fn unsend_message(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state.gateway.unsend_message(user_id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn hide_message(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state.gateway.hide_message_for_me(user_id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

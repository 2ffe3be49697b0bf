use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use kindred_gateway::matching::Swipe;
use kindred_types::api::{
    ConversationResponse, DirectChatRequest, ExclusionsQuery, SwipeRequest, SwipeResponse, UndoSwipeRequest,
};
use kindred_types::models::Conversation;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::middleware::AuthUser;
use crate::state::AppState;

fn conversation_view(conversation: &Conversation, viewer: Uuid) -> Option<ConversationResponse> {
    Some(ConversationResponse {
        id: conversation.id,
        other_user_id: conversation.other_participant(viewer)?,
        is_mutual: conversation.is_mutual,
        pools: conversation.origin.pools().collect(),
        unread: conversation.is_unread_for(viewer),
        updated_at: conversation.updated_at,
    })
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.gateway.list_conversations(user_id).await?;
    let views: Vec<ConversationResponse> = conversations
        .iter()
        .filter_map(|c| conversation_view(c, user_id))
        .collect();
    Ok(Json(views))
}

pub async fn start_direct_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<DirectChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .gateway
        .start_direct_chat(user_id, req.target_user_id, req.pool)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation_view(&conversation, user_id))))
}

pub async fn unmatch(
    State(state): State<AppState>,
    ApiPath(match_id): ApiPath<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state.gateway.unmatch(user_id, match_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn swipe(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<SwipeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .gateway
        .swipe(
            user_id,
            Swipe {
                target_user_id: req.target_user_id,
                action: req.action,
                pool: req.pool,
                target_profile_id: req.target_profile_id,
            },
        )
        .await?;

    let conversation = outcome.conversation.as_ref();
    Ok(Json(SwipeResponse {
        match_id: conversation.map(|c| c.id),
        is_mutual: conversation.is_some_and(|c| c.is_mutual),
        is_rejected: conversation.is_some_and(|c| c.is_rejected),
        new_match: outcome.new_match,
    }))
}

pub async fn undo_swipe(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<UndoSwipeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reverted = state.gateway.undo_last_swipe(user_id, req.pool).await?;
    info!("{} undid a swipe on {} in {}", user_id, reverted.target_user_id, reverted.pool);
    Ok(Json(reverted))
}

pub async fn exclusions(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ExclusionsQuery>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let excluded = state.gateway.discovery_exclusions(user_id, query.pool).await?;
    Ok(Json(excluded))
}

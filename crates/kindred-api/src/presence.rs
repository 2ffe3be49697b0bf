use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use kindred_types::api::{GhostModeRequest, OnlineCountResponse};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn online_count(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.gateway.online_count().await;
    Json(OnlineCountResponse { count })
}

pub async fn set_ghost_mode(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<GhostModeRequest>,
) -> Result<StatusCode, ApiError> {
    state.gateway.set_ghost_mode(user_id, req.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

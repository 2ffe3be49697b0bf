use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MatchPool, Message, MessageKind, SwipeAction};

// -- JWT Claims --

/// JWT claims shared by the HTTP middleware and the live-channel `auth` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: Message,
    /// Set when the request was recognised as a duplicate and the earlier message returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptResponse {
    pub message_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

// -- Matching --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SwipeRequest {
    pub target_user_id: Uuid,
    pub action: SwipeAction,
    #[serde(default = "default_pool")]
    pub pool: MatchPool,
    #[serde(default)]
    pub target_profile_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeResponse {
    pub match_id: Option<Uuid>,
    pub is_mutual: bool,
    pub is_rejected: bool,
    /// True only for the request that flipped the conversation to mutual.
    pub new_match: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct UndoSwipeRequest {
    #[serde(default = "default_pool")]
    pub pool: MatchPool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DirectChatRequest {
    pub target_user_id: Uuid,
    #[serde(default = "default_pool")]
    pub pool: MatchPool,
}

#[derive(Debug, Deserialize)]
pub struct ExclusionsQuery {
    #[serde(default = "default_pool")]
    pub pool: MatchPool,
}

fn default_pool() -> MatchPool {
    MatchPool::Dating
}

/// A conversation as listed for one of its participants.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: Uuid,
    pub other_user_id: Uuid,
    pub is_mutual: bool,
    pub pools: Vec<MatchPool>,
    pub unread: bool,
    pub updated_at: DateTime<Utc>,
}

// -- Presence --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GhostModeRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct OnlineCountResponse {
    pub count: usize,
}

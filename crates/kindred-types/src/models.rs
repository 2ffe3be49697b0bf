use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Returned when a stored or submitted enum tag is not recognised.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownTag {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownTag {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// -- Matching pools --

/// The independent matching pools that can connect two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPool {
    Dating,
    Mentorship,
    Networking,
    Jobs,
}

impl MatchPool {
    pub const ALL: [MatchPool; 4] = [
        MatchPool::Dating,
        MatchPool::Mentorship,
        MatchPool::Networking,
        MatchPool::Jobs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dating => "dating",
            Self::Mentorship => "mentorship",
            Self::Networking => "networking",
            Self::Jobs => "jobs",
        }
    }

    /// Every pool except general dating belongs to the "suite" and uses suite-scoped frames.
    pub fn is_suite(self) -> bool {
        !matches!(self, Self::Dating)
    }
}

impl fmt::Display for MatchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchPool {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dating" => Ok(Self::Dating),
            "mentorship" => Ok(Self::Mentorship),
            "networking" => Ok(Self::Networking),
            "jobs" => Ok(Self::Jobs),
            other => Err(UnknownTag::new("match pool", other)),
        }
    }
}

/// Which pool created a conversation, plus every other pool that later connected the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOrigin {
    pub pool: MatchPool,
    #[serde(default)]
    pub additional_connections: BTreeSet<MatchPool>,
}

impl MatchOrigin {
    pub fn new(pool: MatchPool) -> Self {
        Self {
            pool,
            additional_connections: BTreeSet::new(),
        }
    }

    pub fn includes(&self, pool: MatchPool) -> bool {
        self.pool == pool || self.additional_connections.contains(&pool)
    }

    /// Tags `pool` onto the conversation. Idempotent: returns `false` when the
    /// pool was already the origin or already tagged.
    pub fn add_connection(&mut self, pool: MatchPool) -> bool {
        if self.includes(pool) {
            return false;
        }
        self.additional_connections.insert(pool)
    }

    pub fn pools(&self) -> impl Iterator<Item = MatchPool> + '_ {
        std::iter::once(self.pool).chain(self.additional_connections.iter().copied())
    }
}

// -- Conversations --

/// A durable conversation (match record) between exactly two users.
/// `user_a` is always the lower id of the pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub is_mutual: bool,
    pub is_rejected: bool,
    pub origin: MatchOrigin,
    pub unread_a: bool,
    pub unread_b: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh, unread, non-rejected conversation between `x` and `y`.
    pub fn new(x: Uuid, y: Uuid, origin: MatchOrigin, is_mutual: bool, at: DateTime<Utc>) -> Self {
        let (user_a, user_b) = Self::ordered_pair(x, y);
        Self {
            id: Uuid::new_v4(),
            user_a,
            user_b,
            is_mutual,
            is_rejected: false,
            origin,
            unread_a: false,
            unread_b: false,
            created_at: at,
            updated_at: at,
        }
    }

    /// Storage ordering for an unordered pair: lowest id first.
    pub fn ordered_pair(x: Uuid, y: Uuid) -> (Uuid, Uuid) {
        if x <= y { (x, y) } else { (y, x) }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user_a == user_id {
            Some(self.user_b)
        } else if self.user_b == user_id {
            Some(self.user_a)
        } else {
            None
        }
    }

    /// True when the conversation is between exactly `x` and `y`.
    pub fn connects(&self, x: Uuid, y: Uuid) -> bool {
        Self::ordered_pair(x, y) == (self.user_a, self.user_b)
    }

    pub fn is_unread_for(&self, user_id: Uuid) -> bool {
        if self.user_a == user_id {
            self.unread_a
        } else if self.user_b == user_id {
            self.unread_b
        } else {
            false
        }
    }
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Audio,
    Image,
    /// System message synthesized by the call relay.
    Call,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Call => "call",
        }
    }
}

impl FromStr for MessageKind {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            "call" => Ok(Self::Call),
            other => Err(UnknownTag::new("message kind", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub match_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<Uuid>,
    /// Computed server-side from the replied-to message's sender.
    pub reply_to_own: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub hidden_for_receiver: bool,
}

// -- Swipes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAction {
    Like,
    #[serde(alias = "pass")]
    Dislike,
}

impl SwipeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }
}

impl FromStr for SwipeAction {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "dislike" | "pass" => Ok(Self::Dislike),
            other => Err(UnknownTag::new("swipe action", other)),
        }
    }
}

/// Append-only history entry backing swipe undo. Purged once a pair matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target_user_id: Uuid,
    pub action: SwipeAction,
    pub pool: MatchPool,
    pub created_at: DateTime<Utc>,
}

// -- Calls --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Active,
    Declined,
    Completed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Declined => "declined",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Completed)
    }
}

impl FromStr for CallStatus {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "declined" => Ok(Self::Declined),
            "completed" => Ok(Self::Completed),
            other => Err(UnknownTag::new("call status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: Uuid,
    pub match_id: Uuid,
    pub caller_id: Uuid,
    pub callee_id: Uuid,
    pub call_type: String,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Call {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub ghost_mode: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Public subset of a profile, safe to push to the other side of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub user_id: Uuid,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl From<&UserProfile> for ProfileSummary {
    fn from(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.id,
            display_name: profile.display_name.clone(),
            photo_url: profile.photo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_connection_is_idempotent() {
        let mut origin = MatchOrigin::new(MatchPool::Mentorship);
        assert!(!origin.add_connection(MatchPool::Mentorship));
        assert!(origin.add_connection(MatchPool::Dating));
        assert!(!origin.add_connection(MatchPool::Dating));
        assert_eq!(
            origin.pools().collect::<Vec<_>>(),
            vec![MatchPool::Mentorship, MatchPool::Dating]
        );
    }

    #[test]
    fn origin_serializes_as_tagged_struct() {
        let mut origin = MatchOrigin::new(MatchPool::Jobs);
        origin.add_connection(MatchPool::Networking);
        let json = serde_json::to_value(&origin).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "pool": "jobs", "additionalConnections": ["networking"] })
        );

        let legacy: MatchOrigin = serde_json::from_str(r#"{"pool":"dating"}"#).unwrap();
        assert!(legacy.additional_connections.is_empty());
    }

    #[test]
    fn ordered_pair_puts_lowest_first() {
        let low = Uuid::from_u128(10);
        let high = Uuid::from_u128(20);
        assert_eq!(Conversation::ordered_pair(high, low), (low, high));
        assert_eq!(Conversation::ordered_pair(low, high), (low, high));
    }

    #[test]
    fn pass_is_accepted_as_dislike() {
        assert_eq!("pass".parse::<SwipeAction>().unwrap(), SwipeAction::Dislike);
        assert!("superlike".parse::<SwipeAction>().is_err());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MatchPool, MessageKind, PresenceStatus, ProfileSummary, SwipeAction};

/// Frames sent FROM client TO server over the live channel.
/// Every frame is a flat JSON object discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Authenticate the connection. `token` must be a JWT whose subject is `user_id`.
    Auth { user_id: Uuid, token: String },

    /// Send a chat message into a conversation
    Message {
        match_id: Uuid,
        receiver_id: Uuid,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
    },

    TypingStatus { match_id: Uuid, is_typing: bool },

    MessageRead { message_id: Uuid },

    /// The client opened (or closed) a conversation screen
    ActiveChat { match_id: Uuid, active: bool },

    SwipeAction {
        target_user_id: Uuid,
        action: SwipeAction,
        #[serde(default)]
        pool: Option<MatchPool>,
        #[serde(default)]
        target_profile_id: Option<Uuid>,
    },

    GetOnlineCount {},

    Ping {},

    CallInitiate(CallSignal),
    CallRinging(CallSignal),
    CallAccept(CallSignal),
    CallDecline(CallSignal),
    CallCancel(CallSignal),
    CallEnd(CallSignal),
    WebrtcOffer(CallSignal),
    WebrtcAnswer(CallSignal),
    WebrtcIce(CallSignal),
}

impl ClientFrame {
    /// Splits a call-signaling frame into its kind and payload.
    /// Non-call frames are handed back unchanged.
    pub fn into_call_signal(self) -> Result<(CallSignalKind, CallSignal), Self> {
        match self {
            Self::CallInitiate(s) => Ok((CallSignalKind::Initiate, s)),
            Self::CallRinging(s) => Ok((CallSignalKind::Ringing, s)),
            Self::CallAccept(s) => Ok((CallSignalKind::Accept, s)),
            Self::CallDecline(s) => Ok((CallSignalKind::Decline, s)),
            Self::CallCancel(s) => Ok((CallSignalKind::Cancel, s)),
            Self::CallEnd(s) => Ok((CallSignalKind::End, s)),
            Self::WebrtcOffer(s) => Ok((CallSignalKind::Offer, s)),
            Self::WebrtcAnswer(s) => Ok((CallSignalKind::Answer, s)),
            Self::WebrtcIce(s) => Ok((CallSignalKind::Ice, s)),
            other => Err(other),
        }
    }
}

/// Call-signaling payload as sent by a client. Unknown fields (SDP, ICE candidates,
/// call type...) are carried in `payload` and relayed verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignal {
    pub match_id: Uuid,
    #[serde(alias = "targetId", alias = "receiverId")]
    pub target_user_id: Uuid,
    #[serde(default)]
    pub call_id: Option<Uuid>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSignalKind {
    Initiate,
    Ringing,
    Accept,
    Decline,
    Cancel,
    End,
    Offer,
    Answer,
    Ice,
}

impl CallSignalKind {
    pub fn frame_type(self) -> &'static str {
        match self {
            Self::Initiate => "call_initiate",
            Self::Ringing => "call_ringing",
            Self::Accept => "call_accept",
            Self::Decline => "call_decline",
            Self::Cancel => "call_cancel",
            Self::End => "call_end",
            Self::Offer => "webrtc_offer",
            Self::Answer => "webrtc_answer",
            Self::Ice => "webrtc_ice",
        }
    }
}

/// Which side of a message a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Recipient,
    Sender,
}

/// Payload of a match-created notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchNotice {
    pub match_id: Uuid,
    pub pool: MatchPool,
    pub profile: ProfileSummary,
}

/// A call-signaling frame as forwarded to the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub from_user_id: Uuid,
    pub match_id: Uuid,
    pub call_id: Option<Uuid>,
    pub server_timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Keys the server writes on every relayed signal; a client cannot supply them.
const RESERVED_SIGNAL_KEYS: [&str; 5] =
    ["type", "fromUserId", "matchId", "callId", "serverTimestamp"];

impl RelayedSignal {
    pub fn new(
        from_user_id: Uuid,
        match_id: Uuid,
        call_id: Option<Uuid>,
        server_timestamp: DateTime<Utc>,
        mut payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        for key in RESERVED_SIGNAL_KEYS {
            payload.remove(key);
        }
        Self { from_user_id, match_id, call_id, server_timestamp, payload }
    }
}

/// Frames sent FROM server TO client over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    AuthSuccess { user_id: Uuid },

    AuthError { message: String },

    OnlineCountUpdate { count: usize },

    /// Presence of one user. Ghost-mode users always read offline.
    UserStatus {
        user_id: Uuid,
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_chat_match: Option<Uuid>,
    },

    NewMessage {
        message: Message,
        #[serde(rename = "for")]
        audience: Audience,
    },

    /// Confirmation to the sender. Never reuses `new_message` so a client cannot
    /// mistake its own echo for an incoming message.
    MessageSent {
        message_id: Uuid,
        message: Message,
        #[serde(rename = "for")]
        audience: Audience,
    },

    ReadReceipt {
        message_id: Uuid,
        match_id: Uuid,
        read_at: DateTime<Utc>,
    },

    TypingStatus {
        user_id: Uuid,
        match_id: Uuid,
        is_typing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_cleared: Option<bool>,
    },

    ChatPartnerActive {
        user_id: Uuid,
        match_id: Uuid,
        active: bool,
        in_chat: bool,
    },

    RemoveFromDiscover { remove_user_id: Uuid, reason: String },

    SuiteRemoveFromDiscover {
        suite_type: MatchPool,
        remove_profile_id: Uuid,
        remove_user_id: Uuid,
        reason: String,
    },

    MatchNotification(MatchNotice),
    MentorshipMatch(MatchNotice),
    NetworkingMatch(MatchNotice),
    JobsMatch(MatchNotice),

    DiscoverRefresh { pool: MatchPool, reason: String },

    ConnectionsRefresh { match_id: Uuid },

    /// Acknowledges a swipe sent over the live channel.
    CardRemoval {
        removed_user_id: Uuid,
        action: SwipeAction,
        pool: MatchPool,
    },

    #[serde(rename = "messageDeleted")]
    MessageDeleted { message_id: Uuid, match_id: Uuid },

    CallCreated { call_id: Uuid, match_id: Uuid },

    CallInitiate(RelayedSignal),
    CallRinging(RelayedSignal),
    CallAccept(RelayedSignal),
    CallDecline(RelayedSignal),
    CallCancel(RelayedSignal),
    CallEnd(RelayedSignal),
    WebrtcOffer(RelayedSignal),
    WebrtcAnswer(RelayedSignal),
    WebrtcIce(RelayedSignal),

    Pong {},

    Error { message: String, code: String },
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.to_string(),
        }
    }

    /// The match-created frame for a pool: `match_notification` for dating,
    /// `<pool>_match` for the suite pools.
    pub fn match_created(notice: MatchNotice) -> Self {
        match notice.pool {
            MatchPool::Dating => Self::MatchNotification(notice),
            MatchPool::Mentorship => Self::MentorshipMatch(notice),
            MatchPool::Networking => Self::NetworkingMatch(notice),
            MatchPool::Jobs => Self::JobsMatch(notice),
        }
    }

    pub fn relayed(kind: CallSignalKind, signal: RelayedSignal) -> Self {
        match kind {
            CallSignalKind::Initiate => Self::CallInitiate(signal),
            CallSignalKind::Ringing => Self::CallRinging(signal),
            CallSignalKind::Accept => Self::CallAccept(signal),
            CallSignalKind::Decline => Self::CallDecline(signal),
            CallSignalKind::Cancel => Self::CallCancel(signal),
            CallSignalKind::End => Self::CallEnd(signal),
            CallSignalKind::Offer => Self::WebrtcOffer(signal),
            CallSignalKind::Answer => Self::WebrtcAnswer(signal),
            CallSignalKind::Ice => Self::WebrtcIce(signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_are_flat_and_camel_cased() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "typing_status",
            "matchId": Uuid::nil(),
            "isTyping": true
        }))
        .unwrap();
        assert!(matches!(frame, ClientFrame::TypingStatus { is_typing: true, .. }));

        let frame: ClientFrame = serde_json::from_value(json!({ "type": "ping" })).unwrap();
        assert!(matches!(frame, ClientFrame::Ping {}));
    }

    #[test]
    fn call_frames_keep_unknown_fields() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "webrtc_offer",
            "matchId": Uuid::nil(),
            "targetUserId": Uuid::from_u128(7),
            "sdp": "v=0"
        }))
        .unwrap();

        let (kind, signal) = frame.into_call_signal().unwrap();
        assert_eq!(kind, CallSignalKind::Offer);
        assert_eq!(signal.target_user_id, Uuid::from_u128(7));
        assert_eq!(signal.payload.get("sdp"), Some(&json!("v=0")));
        assert!(!signal.payload.contains_key("type"));
    }

    #[test]
    fn relayed_signals_drop_client_supplied_server_keys() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "webrtc_offer",
            "matchId": Uuid::nil(),
            "targetUserId": Uuid::from_u128(7),
            "fromUserId": Uuid::from_u128(99),
            "serverTimestamp": "1999-01-01T00:00:00Z",
            "sdp": "v=0"
        }))
        .unwrap();
        let (kind, signal) = frame.into_call_signal().unwrap();

        let relayed = RelayedSignal::new(
            Uuid::from_u128(1),
            signal.match_id,
            None,
            Utc::now(),
            signal.payload,
        );
        let text = serde_json::to_string(&ServerFrame::relayed(kind, relayed)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed["type"], "webrtc_offer");
        assert_eq!(parsed["fromUserId"], json!(Uuid::from_u128(1)));
        assert_ne!(parsed["serverTimestamp"], "1999-01-01T00:00:00Z");
        assert_eq!(parsed["sdp"], "v=0");
        assert_eq!(text.matches("\"fromUserId\"").count(), 1);
        assert_eq!(text.matches("\"serverTimestamp\"").count(), 1);
    }

    #[test]
    fn message_frames_use_distinct_types_and_audience() {
        let message = Message {
            id: Uuid::from_u128(1),
            match_id: Uuid::from_u128(2),
            sender_id: Uuid::from_u128(3),
            receiver_id: Uuid::from_u128(4),
            content: "hey".into(),
            kind: MessageKind::Text,
            reply_to_id: None,
            reply_to_own: false,
            created_at: Utc::now(),
            read_at: None,
            hidden_for_receiver: false,
        };

        let incoming = serde_json::to_value(ServerFrame::NewMessage {
            message: message.clone(),
            audience: Audience::Recipient,
        })
        .unwrap();
        assert_eq!(incoming["type"], "new_message");
        assert_eq!(incoming["for"], "recipient");

        let echo = serde_json::to_value(ServerFrame::MessageSent {
            message_id: message.id,
            message,
            audience: Audience::Sender,
        })
        .unwrap();
        assert_eq!(echo["type"], "message_sent");
        assert_eq!(echo["for"], "sender");
        assert_eq!(echo["messageId"], json!(Uuid::from_u128(1)));
    }

    #[test]
    fn match_frames_are_named_per_pool() {
        let notice = MatchNotice {
            match_id: Uuid::nil(),
            pool: MatchPool::Mentorship,
            profile: ProfileSummary {
                user_id: Uuid::nil(),
                display_name: "Ada".into(),
                photo_url: None,
            },
        };
        let json = serde_json::to_value(ServerFrame::match_created(notice)).unwrap();
        assert_eq!(json["type"], "mentorship_match");
        assert_eq!(json["profile"]["displayName"], "Ada");

        let deleted = serde_json::to_value(ServerFrame::MessageDeleted {
            message_id: Uuid::nil(),
            match_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(deleted["type"], "messageDeleted");
    }

    #[test]
    fn auto_cleared_is_omitted_unless_set() {
        let json = serde_json::to_value(ServerFrame::TypingStatus {
            user_id: Uuid::nil(),
            match_id: Uuid::nil(),
            is_typing: false,
            auto_cleared: None,
        })
        .unwrap();
        assert!(json.get("autoCleared").is_none());
    }
}

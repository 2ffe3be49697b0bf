use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use kindred_types::events::{Audience, ServerFrame};
use kindred_types::models::{Conversation, Message, MessageKind};

use crate::config::to_chrono;
use crate::error::denied;
use crate::{Gateway, RealtimeError, stored_now};

const MAX_CONTENT_CHARS: usize = 5000;
const MAX_HISTORY: u32 = 200;

/// A message as submitted by its sender.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub match_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<Uuid>,
}

/// Which duplicate window absorbed a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    RecentExact,
    ShortContent,
    Throttled,
}

impl DuplicateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecentExact => "recent_exact",
            Self::ShortContent => "short_content",
            Self::Throttled => "throttled",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Delivery {
    Created(Message),
    /// An earlier identical send was found; nothing was written or delivered.
    Duplicate { message: Message, reason: DuplicateReason },
}

impl Delivery {
    pub fn message(&self) -> &Message {
        match self {
            Self::Created(m) | Self::Duplicate { message: m, .. } => m,
        }
    }

    pub fn duplicate_reason(&self) -> Option<DuplicateReason> {
        match self {
            Self::Created(_) => None,
            Self::Duplicate { reason, .. } => Some(*reason),
        }
    }
}

fn since(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(to_chrono(d)).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Gateway {
    /// Validates, persists and fans out a chat message. With `dedupe` set,
    /// retries that match an earlier message inside one of the duplicate
    /// windows are answered with that message instead of a new one.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        outgoing: OutgoingMessage,
        dedupe: bool,
    ) -> Result<Delivery, RealtimeError> {
        let OutgoingMessage {
            match_id,
            receiver_id,
            content,
            kind,
            reply_to_id,
        } = outgoing;

        let conversation = self.require_match(match_id).await?;
        if !conversation.is_participant(sender_id) {
            return Err(denied(
                "sender is not a participant of this conversation",
                sender_id,
                Some(receiver_id),
                Some(match_id),
            ));
        }
        if conversation.other_participant(sender_id) != Some(receiver_id) {
            return Err(denied(
                "receiver is not the other participant",
                sender_id,
                Some(receiver_id),
                Some(match_id),
            ));
        }
        if conversation.is_rejected {
            return Err(denied("conversation is closed", sender_id, Some(receiver_id), Some(match_id)));
        }

        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(RealtimeError::InvalidInput("content must not be empty".into()));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(RealtimeError::InvalidInput(format!(
                "content exceeds {} characters",
                MAX_CONTENT_CHARS
            )));
        }
        if kind == MessageKind::Call {
            return Err(RealtimeError::InvalidInput("call messages are system generated".into()));
        }

        let reply_to_own = match reply_to_id {
            Some(reply_id) => {
                let quoted = self
                    .store()
                    .run(move |db| db.get_message_by_id(reply_id))
                    .await?
                    .ok_or(RealtimeError::NotFound("message"))?;
                if quoted.match_id != match_id {
                    return Err(RealtimeError::InvalidInput("reply target is not in this conversation".into()));
                }
                quoted.sender_id == sender_id
            }
            None => false,
        };

        if dedupe {
            if let Some((message, reason)) = self.find_duplicate(sender_id, match_id, &content, kind).await? {
                debug!(
                    "Absorbed duplicate send from {} in {} ({})",
                    sender_id,
                    match_id,
                    reason.as_str()
                );
                return Ok(Delivery::Duplicate { message, reason });
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            match_id,
            sender_id,
            receiver_id,
            content,
            kind,
            reply_to_id,
            reply_to_own,
            created_at: stored_now(),
            read_at: None,
            hidden_for_receiver: false,
        };
        self.persist_message(message.clone()).await?;
        self.deliver(&message).await;

        Ok(Delivery::Created(message))
    }

    async fn find_duplicate(
        &self,
        sender_id: Uuid,
        match_id: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<Option<(Message, DuplicateReason)>, RealtimeError> {
        let windows = self.config().duplicate_windows.clone();
        let content = content.to_string();
        let now = Utc::now();

        self.store()
            .run(move |db| {
                let lookup = |from: DateTime<Utc>, case_insensitive: bool| {
                    db.find_recent_duplicate_messages(sender_id, match_id, &content, kind, from, case_insensitive)
                        .map(|found| found.into_iter().next())
                };

                if let Some(m) = lookup(since(now, windows.exact), false)? {
                    return Ok(Some((m, DuplicateReason::RecentExact)));
                }
                if content.chars().count() <= windows.short_content_max_chars {
                    if let Some(m) = lookup(since(now, windows.short_content), true)? {
                        return Ok(Some((m, DuplicateReason::ShortContent)));
                    }
                }
                if let Some(m) = lookup(since(now, windows.throttle), false)? {
                    return Ok(Some((m, DuplicateReason::Throttled)));
                }
                Ok(None)
            })
            .await
    }

    /// Stores a message and flags the conversation unread for its receiver.
    pub(crate) async fn persist_message(&self, message: Message) -> Result<(), RealtimeError> {
        self.store()
            .run(move |db| {
                db.create_message(&message)?;
                db.mark_match_unread(message.match_id, message.receiver_id)?;
                db.touch_match(message.match_id, message.created_at)
            })
            .await
    }

    /// `new_message` to the receiver, `message_sent` to the sender. Offline
    /// parties simply miss the frame; the message is already stored.
    pub(crate) async fn deliver(&self, message: &Message) {
        let delivered = self
            .dispatcher()
            .send_to_user(
                message.receiver_id,
                ServerFrame::NewMessage {
                    message: message.clone(),
                    audience: Audience::Recipient,
                },
            )
            .await;
        if !delivered {
            debug!("Receiver {} offline, message {} stored only", message.receiver_id, message.id);
        }

        self.dispatcher()
            .send_to_user(
                message.sender_id,
                ServerFrame::MessageSent {
                    message_id: message.id,
                    message: message.clone(),
                    audience: Audience::Sender,
                },
            )
            .await;
    }

    /// Stamps a message read. Only the receiver may do this; repeating it is a
    /// no-op that keeps the first timestamp and sends no second receipt.
    pub async fn mark_read(&self, reader_id: Uuid, message_id: Uuid) -> Result<Message, RealtimeError> {
        let mut message = self
            .store()
            .run(move |db| db.get_message_by_id(message_id))
            .await?
            .ok_or(RealtimeError::NotFound("message"))?;

        if message.receiver_id != reader_id {
            return Err(denied(
                "only the receiver can mark a message read",
                reader_id,
                Some(message.sender_id),
                Some(message.match_id),
            ));
        }
        if message.read_at.is_some() {
            return Ok(message);
        }

        let now = stored_now();
        let stamped = self
            .store()
            .run(move |db| db.mark_message_as_read_with_timestamp(message_id, now))
            .await?;
        if !stamped {
            // Lost a race with another read of the same message.
            return self
                .store()
                .run(move |db| db.get_message_by_id(message_id))
                .await?
                .ok_or(RealtimeError::NotFound("message"));
        }

        message.read_at = Some(now);
        self.dispatcher()
            .send_to_user(
                message.sender_id,
                ServerFrame::ReadReceipt {
                    message_id,
                    match_id: message.match_id,
                    read_at: now,
                },
            )
            .await;
        Ok(message)
    }

    /// Deletes a message for both sides. Sender only.
    pub async fn unsend_message(&self, actor_id: Uuid, message_id: Uuid) -> Result<(), RealtimeError> {
        let message = self
            .store()
            .run(move |db| db.get_message_by_id(message_id))
            .await?
            .ok_or(RealtimeError::NotFound("message"))?;

        if message.sender_id != actor_id {
            return Err(denied(
                "only the sender can unsend a message",
                actor_id,
                Some(message.sender_id),
                Some(message.match_id),
            ));
        }

        let match_id = message.match_id;
        let now = Utc::now();
        self.store()
            .run(move |db| {
                db.delete_message(message_id)?;
                db.touch_match(match_id, now)
            })
            .await?;

        let frame = ServerFrame::MessageDeleted { message_id, match_id };
        self.dispatcher()
            .broadcast_to(&[message.sender_id, message.receiver_id], frame)
            .await;

        info!("{} unsent message {} in {}", actor_id, message_id, match_id);
        Ok(())
    }

    /// Hides a received message from the receiver's own view only.
    pub async fn hide_message_for_me(&self, actor_id: Uuid, message_id: Uuid) -> Result<(), RealtimeError> {
        let message = self
            .store()
            .run(move |db| db.get_message_by_id(message_id))
            .await?
            .ok_or(RealtimeError::NotFound("message"))?;

        if message.receiver_id != actor_id {
            return Err(denied(
                "only the receiver can hide a message",
                actor_id,
                Some(message.sender_id),
                Some(message.match_id),
            ));
        }

        self.store()
            .run(move |db| db.hide_message_for_receiver(message_id))
            .await?;
        Ok(())
    }

    /// Newest messages of a conversation as the viewer sees them, oldest
    /// first. Reading the history clears the viewer's unread flag.
    pub async fn conversation_history(
        &self,
        viewer_id: Uuid,
        match_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Message>, RealtimeError> {
        self.require_participant(viewer_id, match_id).await?;
        let limit = limit.clamp(1, MAX_HISTORY);

        self.store()
            .run(move |db| {
                let mut messages = db.list_messages(match_id, viewer_id, limit)?;
                db.mark_match_read(match_id, viewer_id)?;
                messages.reverse();
                Ok(messages)
            })
            .await
    }

    /// Live (non-rejected) conversations of a user, most recently active first.
    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, RealtimeError> {
        self.store().run(move |db| db.list_matches_for_user(user_id)).await
    }
}

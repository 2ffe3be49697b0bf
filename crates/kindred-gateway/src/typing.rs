use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use kindred_types::events::ServerFrame;

use crate::error::denied;
use crate::{Gateway, RealtimeError};

impl Gateway {
    /// Records a typing indicator and forwards it to the other participant.
    /// `true` arms (or re-arms) an auto-clear after the configured timeout.
    pub async fn set_typing(&self, user_id: Uuid, match_id: Uuid, is_typing: bool) -> Result<(), RealtimeError> {
        let (conversation, partner) = self.require_participant(user_id, match_id).await?;
        if is_typing && conversation.is_rejected {
            return Err(denied("conversation is closed", user_id, Some(partner), Some(match_id)));
        }

        let now = Utc::now();
        self.store()
            .run(move |db| db.set_typing_status(match_id, user_id, is_typing, now))
            .await?;

        if is_typing {
            let gateway = self.clone();
            self.inner.typing_timers.schedule(
                (user_id, match_id),
                self.config().typing_timeout,
                async move { gateway.expire_typing(user_id, match_id, partner).await },
            );
        } else {
            self.inner.typing_timers.cancel(&(user_id, match_id));
        }

        self.dispatcher()
            .send_to_user(
                partner,
                ServerFrame::TypingStatus {
                    user_id,
                    match_id,
                    is_typing,
                    auto_cleared: None,
                },
            )
            .await;
        Ok(())
    }

    /// Whether an auto-clear is pending for this user in this conversation.
    pub fn is_typing_armed(&self, user_id: Uuid, match_id: Uuid) -> bool {
        self.inner.typing_timers.is_scheduled(&(user_id, match_id))
    }

    pub(crate) fn cancel_typing(&self, user_id: Uuid, match_id: Uuid) {
        self.inner.typing_timers.cancel(&(user_id, match_id));
    }

    async fn expire_typing(&self, user_id: Uuid, match_id: Uuid, partner: Uuid) {
        debug!("Typing indicator of {} in {} expired", user_id, match_id);

        let now = Utc::now();
        if let Err(e) = self
            .store()
            .run(move |db| db.set_typing_status(match_id, user_id, false, now))
            .await
        {
            // The conversation may have been removed in the meantime.
            warn!("Failed to clear typing status of {} in {}: {}", user_id, match_id, e);
        }

        self.dispatcher()
            .send_to_user(
                partner,
                ServerFrame::TypingStatus {
                    user_id,
                    match_id,
                    is_typing: false,
                    auto_cleared: Some(true),
                },
            )
            .await;
    }
}

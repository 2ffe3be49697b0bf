use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use kindred_types::events::{MatchNotice, ServerFrame};
use kindred_types::models::{Conversation, MatchOrigin, MatchPool, SwipeAction, SwipeRecord, UserProfile};

use crate::config::to_chrono;
use crate::error::denied;
use crate::{Gateway, RealtimeError};

/// One swipe as submitted by a client.
#[derive(Debug, Clone, Copy)]
pub struct Swipe {
    pub target_user_id: Uuid,
    pub action: SwipeAction,
    pub pool: MatchPool,
    /// Suite pools show per-pool profiles; this is the card that was swiped.
    pub target_profile_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SwipeOutcome {
    pub conversation: Option<Conversation>,
    /// True only for the request that turned the pair mutual.
    pub new_match: bool,
}

enum DirectChat {
    Blocked(Conversation),
    Opened { conversation: Conversation, newly_mutual: bool },
}

enum Undo {
    Nothing,
    Expired,
    Settled,
    Reverted(SwipeRecord),
}

impl Gateway {
    pub async fn swipe(&self, actor_id: Uuid, swipe: Swipe) -> Result<SwipeOutcome, RealtimeError> {
        match swipe.action {
            SwipeAction::Like => self.like(actor_id, swipe).await,
            SwipeAction::Dislike => self.pass(actor_id, swipe).await,
        }
    }

    async fn check_target(&self, actor_id: Uuid, target_id: Uuid) -> Result<UserProfile, RealtimeError> {
        if actor_id == target_id {
            return Err(RealtimeError::InvalidInput("cannot swipe on yourself".into()));
        }
        self.store()
            .run(move |db| db.get_user(target_id))
            .await?
            .ok_or(RealtimeError::NotFound("user"))
    }

    async fn like(&self, actor_id: Uuid, swipe: Swipe) -> Result<SwipeOutcome, RealtimeError> {
        let Swipe {
            target_user_id: target_id,
            pool,
            target_profile_id,
            ..
        } = swipe;
        self.check_target(actor_id, target_id).await?;

        let now = Utc::now();
        let outcome = self
            .store()
            .run(move |db| {
                let existing = db.get_match_between_users(actor_id, target_id)?;
                if existing.as_ref().is_some_and(|c| c.is_rejected) {
                    return Ok(SwipeOutcome {
                        conversation: existing,
                        new_match: false,
                    });
                }

                let written = db.record_interest(actor_id, target_id, pool, SwipeAction::Like, now)?;
                if !written && db.get_interest(actor_id, target_id, pool)? == Some(SwipeAction::Dislike) {
                    // An earlier pass in this pool stands.
                    return Ok(SwipeOutcome {
                        conversation: existing,
                        new_match: false,
                    });
                }

                db.add_swipe_history(&SwipeRecord {
                    id: Uuid::new_v4(),
                    user_id: actor_id,
                    target_user_id: target_id,
                    action: SwipeAction::Like,
                    pool,
                    created_at: now,
                })?;

                let mut conversation = match existing {
                    Some(existing) => existing,
                    None => db.create_match(&Conversation::new(
                        actor_id,
                        target_id,
                        MatchOrigin::new(pool),
                        false,
                        now,
                    ))?,
                };

                if conversation.origin.add_connection(pool) {
                    db.update_match_origin(conversation.id, &conversation.origin, now)?;
                }

                let mut new_match = false;
                if db.get_interest(target_id, actor_id, pool)? == Some(SwipeAction::Like) {
                    new_match = db.set_match_mutual(conversation.id, now)?;
                    conversation.is_mutual = true;
                    if new_match {
                        db.remove_matched_users_from_swipe_history(actor_id, target_id)?;
                    }
                }

                Ok(SwipeOutcome {
                    conversation: Some(conversation),
                    new_match,
                })
            })
            .await?;

        let reason = if outcome.new_match { "match" } else { "like" };
        self.remove_cards(actor_id, target_id, pool, target_profile_id, reason).await;

        if outcome.new_match {
            if let Some(conversation) = &outcome.conversation {
                info!("{} and {} matched in {}", actor_id, target_id, pool);
                self.announce_match(conversation, pool).await;
            }
        }
        Ok(outcome)
    }

    async fn pass(&self, actor_id: Uuid, swipe: Swipe) -> Result<SwipeOutcome, RealtimeError> {
        let Swipe {
            target_user_id: target_id,
            pool,
            target_profile_id,
            ..
        } = swipe;
        self.check_target(actor_id, target_id).await?;

        let now = Utc::now();
        let (conversation, withdrawn) = self
            .store()
            .run(move |db| {
                let mut written = db.record_interest(actor_id, target_id, pool, SwipeAction::Dislike, now)?;
                if !written && db.get_interest(actor_id, target_id, pool)? == Some(SwipeAction::Like) {
                    let existing = db.get_match_between_users(actor_id, target_id)?;
                    if existing.as_ref().is_some_and(|c| c.is_mutual) {
                        return Ok((existing, false));
                    }
                    // Withdraw the unanswered like.
                    db.replace_interest(actor_id, target_id, pool, SwipeAction::Dislike, now)?;
                    if let Some(prior) = db.get_swipe_between(actor_id, target_id, pool)? {
                        db.delete_swipe_history(prior.id)?;
                    }
                    written = true;
                }
                if written {
                    db.add_swipe_history(&SwipeRecord {
                        id: Uuid::new_v4(),
                        user_id: actor_id,
                        target_user_id: target_id,
                        action: SwipeAction::Dislike,
                        pool,
                        created_at: now,
                    })?;
                }

                if pool == MatchPool::Dating {
                    // Dating passes hide the pair from each other.
                    db.record_interest(target_id, actor_id, pool, SwipeAction::Dislike, now)?;
                    db.invalidate_compatibility(actor_id, target_id)?;
                }

                let mut conversation = db.get_match_between_users(actor_id, target_id)?;
                let mut withdrawn = false;
                if let Some(c) = conversation.as_mut() {
                    if db.set_match_rejected(c.id, now)? {
                        c.is_rejected = true;
                        withdrawn = true;
                    }
                }
                Ok((conversation, withdrawn))
            })
            .await?;

        self.remove_cards(actor_id, target_id, pool, target_profile_id, "pass").await;

        if let (true, Some(c)) = (withdrawn, &conversation) {
            let frame = ServerFrame::ConnectionsRefresh { match_id: c.id };
            self.dispatcher().broadcast_to(&[actor_id, target_id], frame).await;
        }

        Ok(SwipeOutcome {
            conversation,
            new_match: false,
        })
    }

    /// Opens a conversation without waiting for a reciprocal swipe. The pair
    /// becomes mutual immediately; an existing record only gains the pool tag.
    pub async fn start_direct_chat(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        pool: MatchPool,
    ) -> Result<Conversation, RealtimeError> {
        self.check_target(actor_id, target_id).await?;

        let now = Utc::now();
        let result = self
            .store()
            .run(move |db| {
                let fresh = Conversation::new(actor_id, target_id, MatchOrigin::new(pool), true, now);
                let mut conversation = db.create_match(&fresh)?;
                if conversation.id == fresh.id {
                    db.remove_matched_users_from_swipe_history(actor_id, target_id)?;
                    return Ok(DirectChat::Opened {
                        conversation,
                        newly_mutual: true,
                    });
                }
                if conversation.is_rejected {
                    return Ok(DirectChat::Blocked(conversation));
                }

                if conversation.origin.add_connection(pool) {
                    db.update_match_origin(conversation.id, &conversation.origin, now)?;
                }
                let newly_mutual = db.set_match_mutual(conversation.id, now)?;
                conversation.is_mutual = true;
                if newly_mutual {
                    db.remove_matched_users_from_swipe_history(actor_id, target_id)?;
                }
                Ok(DirectChat::Opened {
                    conversation,
                    newly_mutual,
                })
            })
            .await?;

        match result {
            DirectChat::Blocked(c) => Err(denied(
                "this pair can no longer connect",
                actor_id,
                Some(target_id),
                Some(c.id),
            )),
            DirectChat::Opened {
                conversation,
                newly_mutual,
            } => {
                if newly_mutual {
                    self.announce_match(&conversation, pool).await;
                } else {
                    let frame = ServerFrame::ConnectionsRefresh {
                        match_id: conversation.id,
                    };
                    self.dispatcher().broadcast_to(&[actor_id, target_id], frame).await;
                }
                Ok(conversation)
            }
        }
    }

    /// Ends a conversation for good: snapshots it for audit, removes it with
    /// its messages, calls and typing state, and leaves a rejected record so
    /// the pair never reconnects. Returns that record.
    pub async fn unmatch(&self, actor_id: Uuid, match_id: Uuid) -> Result<Conversation, RealtimeError> {
        let (conversation, partner) = self.require_participant(actor_id, match_id).await?;
        if conversation.is_rejected {
            return Ok(conversation);
        }

        let now = Utc::now();
        let snapshot = conversation.clone();
        let archived = self
            .store()
            .run(move |db| {
                let messages = db.list_all_messages(snapshot.id)?;
                db.archive_match(&snapshot, &messages, "unmatch", now)
            })
            .await;
        if let Err(e) = archived {
            warn!("Archiving {} failed, unmatching anyway: {}", match_id, e);
        }

        self.cancel_typing(actor_id, match_id);
        self.cancel_typing(partner, match_id);

        let doomed = conversation.clone();
        let rejected = self
            .store()
            .run(move |db| db.replace_match_with_rejection(&doomed, now))
            .await?;

        self.inner.presence.set_in_chat(actor_id, match_id, false).await;
        self.inner.presence.set_in_chat(partner, match_id, false).await;

        info!(
            target: "kindred::audit",
            user_id = %actor_id,
            target_id = %partner,
            match_id = %match_id,
            "unmatched"
        );

        self.remove_cards(actor_id, partner, conversation.origin.pool, None, "unmatch").await;
        let frame = ServerFrame::ConnectionsRefresh { match_id };
        self.dispatcher().broadcast_to(&[actor_id, partner], frame).await;

        Ok(rejected)
    }

    /// Reverts the user's most recent swipe in `pool` while it is still
    /// inside the undo window and the pair has not been settled by a match
    /// or a rejection.
    pub async fn undo_last_swipe(&self, actor_id: Uuid, pool: MatchPool) -> Result<SwipeRecord, RealtimeError> {
        let window = to_chrono(self.config().undo_window);
        let now = Utc::now();

        let undo = self
            .store()
            .run(move |db| {
                let Some(record) = db.get_user_swipe_history(actor_id, pool, 1)?.into_iter().next() else {
                    return Ok(Undo::Nothing);
                };
                if now - record.created_at > window {
                    return Ok(Undo::Expired);
                }

                let target_id = record.target_user_id;
                let conversation = db.get_match_between_users(actor_id, target_id)?;
                if conversation.as_ref().is_some_and(|c| c.is_mutual || c.is_rejected) {
                    return Ok(Undo::Settled);
                }

                db.delete_swipe_history(record.id)?;
                db.delete_interest(actor_id, target_id, pool)?;

                match record.action {
                    SwipeAction::Dislike => {
                        if pool == MatchPool::Dating && db.get_swipe_between(target_id, actor_id, pool)?.is_none() {
                            db.delete_interest(target_id, actor_id, pool)?;
                        }
                    }
                    SwipeAction::Like => {
                        if let Some(c) = conversation {
                            let only_this_like = c.origin.pool == pool
                                && c.origin.additional_connections.is_empty()
                                && db.list_all_messages(c.id)?.is_empty();
                            if only_this_like {
                                db.delete_match(c.id)?;
                            } else {
                                let mut origin = c.origin.clone();
                                if origin.additional_connections.remove(&pool) {
                                    db.update_match_origin(c.id, &origin, now)?;
                                }
                            }
                        }
                    }
                }
                Ok(Undo::Reverted(record))
            })
            .await?;

        match undo {
            Undo::Nothing => Err(RealtimeError::NotFound("swipe")),
            Undo::Expired => Err(RealtimeError::Conflict("swipe can no longer be undone".into())),
            Undo::Settled => Err(RealtimeError::Conflict("this pair is already settled".into())),
            Undo::Reverted(record) => {
                self.dispatcher()
                    .send_to_user(
                        actor_id,
                        ServerFrame::DiscoverRefresh {
                            pool,
                            reason: "undo".into(),
                        },
                    )
                    .await;
                Ok(record)
            }
        }
    }

    /// Users that must never be shown to `actor_id` again in `pool`.
    pub async fn discovery_exclusions(&self, actor_id: Uuid, pool: MatchPool) -> Result<Vec<Uuid>, RealtimeError> {
        self.store()
            .run(move |db| db.discovery_exclusions(actor_id, pool))
            .await
    }

    /// Tells both sides to drop each other's card from discovery.
    async fn remove_cards(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        pool: MatchPool,
        target_profile_id: Option<Uuid>,
        reason: &str,
    ) {
        let frame = |removed: Uuid, profile: Uuid| {
            if pool.is_suite() {
                ServerFrame::SuiteRemoveFromDiscover {
                    suite_type: pool,
                    remove_profile_id: profile,
                    remove_user_id: removed,
                    reason: reason.to_string(),
                }
            } else {
                ServerFrame::RemoveFromDiscover {
                    remove_user_id: removed,
                    reason: reason.to_string(),
                }
            }
        };

        self.dispatcher()
            .send_to_user(actor_id, frame(target_id, target_profile_id.unwrap_or(target_id)))
            .await;
        self.dispatcher()
            .send_to_user(target_id, frame(actor_id, actor_id))
            .await;
    }

    /// Pool-specific match frame to each side carrying the other's profile,
    /// followed by discovery and connections refreshes.
    async fn announce_match(&self, conversation: &Conversation, pool: MatchPool) {
        let (a, b) = (conversation.user_a, conversation.user_b);
        let profiles = self
            .store()
            .run(move |db| Ok((db.get_user(a)?, db.get_user(b)?)))
            .await;

        match profiles {
            Ok((Some(profile_a), Some(profile_b))) => {
                for (recipient, other) in [(a, &profile_b), (b, &profile_a)] {
                    let notice = MatchNotice {
                        match_id: conversation.id,
                        pool,
                        profile: other.into(),
                    };
                    self.dispatcher()
                        .send_to_user(recipient, ServerFrame::match_created(notice))
                        .await;
                }
            }
            Ok(_) => warn!("Match {} has a participant without a profile", conversation.id),
            Err(e) => warn!("Could not load profiles for match {}: {}", conversation.id, e),
        }

        for user_id in [a, b] {
            self.dispatcher()
                .send_to_user(
                    user_id,
                    ServerFrame::DiscoverRefresh {
                        pool,
                        reason: "match".into(),
                    },
                )
                .await;
            self.dispatcher()
                .send_to_user(
                    user_id,
                    ServerFrame::ConnectionsRefresh {
                        match_id: conversation.id,
                    },
                )
                .await;
        }
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use kindred_types::events::{CallSignal, CallSignalKind, RelayedSignal, ServerFrame};
use kindred_types::models::{Call, CallStatus, Message, MessageKind};

use crate::error::denied;
use crate::{Gateway, RealtimeError, stored_now};

/// Sliding-window limiter: at most `budget` attempts per user per `window`.
pub struct RateLimiter {
    budget: u32,
    window: Duration,
    hits: Mutex<Hits>,
}

/// Users with no attempt inside the window are swept once the map reaches
/// `sweep_at` entries.
struct Hits {
    by_user: HashMap<Uuid, VecDeque<Instant>>,
    sweep_at: usize,
}

const MIN_SWEEP_AT: usize = 1024;

impl RateLimiter {
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget,
            window,
            hits: Mutex::new(Hits {
                by_user: HashMap::new(),
                sweep_at: MIN_SWEEP_AT,
            }),
        }
    }

    /// Records an attempt. Returns false when the user already spent the
    /// budget inside the current window.
    pub fn try_acquire(&self, user_id: Uuid) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);

        if hits.by_user.len() >= hits.sweep_at {
            let window = self.window;
            hits.by_user
                .retain(|_, recent| recent.back().is_some_and(|t| now.duration_since(*t) < window));
            hits.sweep_at = (hits.by_user.len() * 2).max(MIN_SWEEP_AT);
        }

        let recent = hits.by_user.entry(user_id).or_default();
        while recent.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            recent.pop_front();
        }
        if recent.len() >= self.budget as usize {
            return false;
        }
        recent.push_back(now);
        true
    }

    /// Number of users the limiter currently keeps history for.
    pub fn tracked_users(&self) -> usize {
        self.hits.lock().unwrap_or_else(PoisonError::into_inner).by_user.len()
    }
}

impl Gateway {
    /// Relays one call-signaling frame to its target after checking that
    /// the conversation connects sender and target. Call records move along
    /// with the control frames; `call_initiate` without a call id creates one
    /// and reports it back to the caller. Returns the call id, if any.
    pub async fn relay_call_signal(
        &self,
        sender_id: Uuid,
        kind: CallSignalKind,
        signal: CallSignal,
    ) -> Result<Option<Uuid>, RealtimeError> {
        if !self.inner.call_limiter.try_acquire(sender_id) {
            warn!("{} exceeded the call signaling budget", sender_id);
            return Err(RealtimeError::RateLimited);
        }

        let CallSignal {
            match_id,
            target_user_id: target_id,
            call_id,
            payload,
        } = signal;

        if sender_id == target_id {
            return Err(RealtimeError::InvalidInput("cannot call yourself".into()));
        }

        let conversation = self.require_match(match_id).await?;
        if !conversation.connects(sender_id, target_id) {
            return Err(denied(
                "conversation does not connect caller and target",
                sender_id,
                Some(target_id),
                Some(match_id),
            ));
        }
        if conversation.is_rejected {
            return Err(denied("conversation is closed", sender_id, Some(target_id), Some(match_id)));
        }

        let call_id = match call_id {
            Some(id) => {
                let call = self
                    .store()
                    .run(move |db| db.get_call(id))
                    .await?
                    .ok_or(RealtimeError::NotFound("call"))?;
                if call.match_id != match_id || !call.is_party(sender_id) || !call.is_party(target_id) {
                    return Err(denied("not a party to this call", sender_id, Some(target_id), Some(match_id)));
                }
                self.advance_call(kind, &call).await?;
                Some(id)
            }
            None if kind == CallSignalKind::Initiate => {
                let call_type = payload
                    .get("callType")
                    .and_then(|v| v.as_str())
                    .unwrap_or("audio")
                    .to_string();
                let call = Call {
                    id: Uuid::new_v4(),
                    match_id,
                    caller_id: sender_id,
                    callee_id: target_id,
                    call_type,
                    status: CallStatus::Pending,
                    created_at: Utc::now(),
                    started_at: None,
                    ended_at: None,
                };
                let id = call.id;
                self.store().run(move |db| db.create_call(&call)).await?;
                self.dispatcher()
                    .send_to_user(sender_id, ServerFrame::CallCreated { call_id: id, match_id })
                    .await;
                info!("{} is calling {} ({})", sender_id, target_id, id);
                Some(id)
            }
            None => None,
        };

        let relayed = RelayedSignal::new(sender_id, match_id, call_id, Utc::now(), payload);
        if !self
            .dispatcher()
            .send_to_user(target_id, ServerFrame::relayed(kind, relayed))
            .await
        {
            debug!("Dropped {} for offline user {}", kind.frame_type(), target_id);
        }
        Ok(call_id)
    }

    /// Applies the status change a control frame implies. Calls that end
    /// before anyone picked up leave a single missed-call message. The
    /// status change stands even if that message cannot be written.
    async fn advance_call(&self, kind: CallSignalKind, call: &Call) -> Result<(), RealtimeError> {
        let id = call.id;
        let transition = |from: CallStatus, to: CallStatus| async move {
            let now = Utc::now();
            self.store().run(move |db| db.transition_call(id, from, to, now)).await
        };

        match kind {
            CallSignalKind::Accept => {
                transition(CallStatus::Pending, CallStatus::Active).await?;
            }
            CallSignalKind::Decline | CallSignalKind::Cancel => {
                if transition(CallStatus::Pending, CallStatus::Declined).await? {
                    self.record_missed_call(call, kind).await;
                }
            }
            CallSignalKind::End => {
                if !transition(CallStatus::Active, CallStatus::Completed).await?
                    && transition(CallStatus::Pending, CallStatus::Completed).await?
                {
                    self.record_missed_call(call, kind).await;
                }
            }
            CallSignalKind::Initiate
            | CallSignalKind::Ringing
            | CallSignalKind::Offer
            | CallSignalKind::Answer
            | CallSignalKind::Ice => {}
        }
        Ok(())
    }

    async fn record_missed_call(&self, call: &Call, kind: CallSignalKind) {
        let content = match kind {
            CallSignalKind::Decline => "No answer".to_string(),
            _ => format!("Missed {} call", call.call_type),
        };
        let message = Message {
            id: Uuid::new_v4(),
            match_id: call.match_id,
            sender_id: call.caller_id,
            receiver_id: call.callee_id,
            content,
            kind: MessageKind::Call,
            reply_to_id: None,
            reply_to_own: false,
            created_at: stored_now(),
            read_at: None,
            hidden_for_receiver: false,
        };
        if let Err(e) = self.persist_message(message.clone()).await {
            error!("Call {} ended but its missed-call message was lost: {}", call.id, e);
            return;
        }
        self.deliver(&message).await;
    }
}

pub mod auth;
pub mod calls;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod matching;
pub mod presence;
pub mod scheduler;
pub mod store;
pub mod typing;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use kindred_db::Database;
use kindred_types::models::Conversation;

pub use config::{DuplicateWindows, GatewayConfig};
pub use dispatcher::{ConnectionHandle, Dispatcher, Outbound};
pub use error::RealtimeError;

use calls::RateLimiter;
use error::denied;
use presence::PresenceTracker;
use scheduler::DeferredTasks;
use store::Store;

/// Shared realtime context: connection registry, presence, timers and
/// storage. Cheap to clone; every clone is the same gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    dispatcher: Dispatcher,
    store: Store,
    presence: PresenceTracker,
    /// (user_id, match_id) -> pending typing auto-clear
    typing_timers: DeferredTasks<(Uuid, Uuid)>,
    /// user_id -> pending final offline broadcast
    offline_timers: DeferredTasks<Uuid>,
    call_limiter: RateLimiter,
}

impl Gateway {
    pub fn new(db: Arc<Database>, config: GatewayConfig) -> Self {
        let call_limiter = RateLimiter::new(config.call_signals_per_minute, Duration::from_secs(60));
        Self {
            inner: Arc::new(GatewayInner {
                dispatcher: Dispatcher::new(),
                store: Store::new(db),
                presence: PresenceTracker::default(),
                typing_timers: DeferredTasks::new(),
                offline_timers: DeferredTasks::new(),
                call_limiter,
                config,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Loads a conversation or fails with `not_found`.
    pub(crate) async fn require_match(&self, match_id: Uuid) -> Result<Conversation, RealtimeError> {
        self.store()
            .run(move |db| db.get_match_by_id(match_id))
            .await?
            .ok_or(RealtimeError::NotFound("conversation"))
    }

    /// Loads a conversation `user_id` takes part in and returns it with the
    /// other participant.
    pub(crate) async fn require_participant(
        &self,
        user_id: Uuid,
        match_id: Uuid,
    ) -> Result<(Conversation, Uuid), RealtimeError> {
        let conversation = self.require_match(match_id).await?;
        match conversation.other_participant(user_id) {
            Some(partner) => Ok((conversation, partner)),
            None => Err(denied("not a participant of this conversation", user_id, None, Some(match_id))),
        }
    }
}

/// Current time at the millisecond precision storage keeps, so values
/// echoed to clients match what a later read returns.
pub(crate) fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_types::events::ServerFrame;
use kindred_types::models::PresenceStatus;

use crate::error::denied;
use crate::{ConnectionHandle, Gateway, Outbound, RealtimeError};

/// Presence of one user as last observed by this process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceEntry {
    /// Connection that owns this entry; `None` reads as offline.
    pub conn_id: Option<Uuid>,
    /// Conversation the user currently has open, if any.
    pub in_chat_with: Option<Uuid>,
    pub ghost: bool,
}

impl PresenceEntry {
    /// Online as other users are allowed to see it.
    pub fn visible_online(&self) -> bool {
        self.conn_id.is_some() && !self.ghost
    }

    /// The `user_status` frame others receive. Ghost-mode users always read
    /// offline, with no open chat.
    pub fn status_frame(&self, user_id: Uuid) -> ServerFrame {
        if self.visible_online() {
            ServerFrame::UserStatus {
                user_id,
                status: PresenceStatus::Online,
                last_seen: None,
                in_chat_match: self.in_chat_with,
            }
        } else {
            ServerFrame::UserStatus {
                user_id,
                status: PresenceStatus::Offline,
                last_seen: None,
                in_chat_match: None,
            }
        }
    }
}

/// In-memory presence table. Only connected users have an entry.
#[derive(Default)]
pub struct PresenceTracker {
    entries: RwLock<HashMap<Uuid, PresenceEntry>>,
}

impl PresenceTracker {
    pub async fn mark_online(&self, user_id: Uuid, conn_id: Uuid, ghost: bool) -> PresenceEntry {
        let entry = PresenceEntry {
            conn_id: Some(conn_id),
            in_chat_with: None,
            ghost,
        };
        self.entries.write().await.insert(user_id, entry.clone());
        entry
    }

    /// Drops the user's entry if `conn_id` still owns it and returns it.
    /// A newer connection's entry is left alone.
    pub async fn mark_offline(&self, user_id: Uuid, conn_id: Uuid) -> Option<PresenceEntry> {
        let mut entries = self.entries.write().await;
        if entries.get(&user_id)?.conn_id != Some(conn_id) {
            return None;
        }
        entries.remove(&user_id)
    }

    /// Opening a chat replaces whatever was open; closing only clears the
    /// entry if it still points at `match_id`.
    pub async fn set_in_chat(&self, user_id: Uuid, match_id: Uuid, active: bool) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&user_id) else {
            return;
        };
        if active {
            entry.in_chat_with = Some(match_id);
        } else if entry.in_chat_with == Some(match_id) {
            entry.in_chat_with = None;
        }
    }

    /// Returns the updated entry when the user is known to this process.
    pub async fn set_ghost(&self, user_id: Uuid, ghost: bool) -> Option<PresenceEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&user_id)?;
        entry.ghost = ghost;
        Some(entry.clone())
    }

    pub async fn get(&self, user_id: Uuid) -> Option<PresenceEntry> {
        self.entries.read().await.get(&user_id).cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.visible_online())
            .count()
    }

    pub async fn visible_online(&self) -> Vec<(Uuid, PresenceEntry)> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.visible_online())
            .map(|(id, e)| (*id, e.clone()))
            .collect()
    }
}

impl Gateway {
    /// Brings an authenticated user online: registers the connection
    /// (closing any older one), sends them a snapshot of who is online, and
    /// announces them to everyone else.
    pub async fn connect(
        &self,
        user_id: Uuid,
    ) -> Result<(ConnectionHandle, UnboundedReceiver<Outbound>), RealtimeError> {
        let Some(profile) = self.store().run(move |db| db.get_user(user_id)).await? else {
            warn!(target: "kindred::audit", user_id = %user_id, "auth for unknown user");
            return Err(RealtimeError::Unauthenticated);
        };

        let (handle, rx) = ConnectionHandle::open();

        for (uid, entry) in self.inner.presence.visible_online().await {
            if uid != user_id {
                handle.send(entry.status_frame(uid));
            }
        }

        if let Some(previous) = self.dispatcher().register(user_id, handle.clone()).await {
            info!(
                "{} ({}) reconnected, closing connection {}",
                profile.display_name,
                user_id,
                previous.conn_id()
            );
            previous.close();
        }
        self.inner.offline_timers.cancel(&user_id);

        let entry = self
            .inner
            .presence
            .mark_online(user_id, handle.conn_id(), profile.ghost_mode)
            .await;

        let now = Utc::now();
        if let Err(e) = self.store().run(move |db| db.touch_last_seen(user_id, now)).await {
            warn!("Failed to record last seen for {}: {}", user_id, e);
        }

        if entry.visible_online() {
            self.dispatcher().broadcast_all(entry.status_frame(user_id)).await;
        }
        self.broadcast_online_count().await;

        info!("{} ({}) connected to gateway", profile.display_name, user_id);
        Ok((handle, rx))
    }

    /// Tears down a connection. A no-op unless `conn_id` is still the user's
    /// current connection.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        if !self.dispatcher().unregister(user_id, conn_id).await {
            debug!("Connection {} of {} was already superseded", conn_id, user_id);
            return;
        }

        let Some(before) = self.inner.presence.mark_offline(user_id, conn_id).await else {
            debug!("Presence of {} belongs to a newer connection", user_id);
            return;
        };
        let ghost = before.ghost;

        if let Some(match_id) = before.in_chat_with {
            self.notify_chat_left(user_id, match_id).await;
        }

        let now = Utc::now();
        if let Err(e) = self.store().run(move |db| db.touch_last_seen(user_id, now)).await {
            warn!("Failed to record last seen for {}: {}", user_id, e);
        }

        if self.dispatcher().is_connected(user_id).await {
            debug!("{} came back before the offline broadcast", user_id);
            return;
        }
        let offline = ServerFrame::UserStatus {
            user_id,
            status: PresenceStatus::Offline,
            last_seen: if ghost { None } else { Some(now) },
            in_chat_match: None,
        };
        if !ghost {
            self.dispatcher().broadcast_all(offline.clone()).await;
        }
        self.broadcast_online_count().await;

        // Clients may have rendered an in-chat badge from frames still in flight.
        let gateway = self.clone();
        self.inner
            .offline_timers
            .schedule(user_id, self.config().offline_clear_delay, async move {
                if gateway.dispatcher().is_connected(user_id).await {
                    return;
                }
                if !ghost {
                    gateway.dispatcher().broadcast_all(offline).await;
                }
            });

        info!("{} disconnected from gateway", user_id);
    }

    async fn notify_chat_left(&self, user_id: Uuid, match_id: Uuid) {
        let conversation = match self.require_match(match_id).await {
            Ok(c) => c,
            Err(e) => {
                debug!("Skipping chat-left notice for {}: {}", match_id, e);
                return;
            }
        };
        if let Some(partner) = conversation.other_participant(user_id) {
            self.dispatcher()
                .send_to_user(
                    partner,
                    ServerFrame::ChatPartnerActive {
                        user_id,
                        match_id,
                        active: false,
                        in_chat: false,
                    },
                )
                .await;
        }
    }

    /// Records which conversation the user has open and tells the partner.
    pub async fn set_active_chat(&self, user_id: Uuid, match_id: Uuid, active: bool) -> Result<(), RealtimeError> {
        let (conversation, partner) = self.require_participant(user_id, match_id).await?;
        if active && conversation.is_rejected {
            return Err(denied("conversation is closed", user_id, Some(partner), Some(match_id)));
        }

        self.inner.presence.set_in_chat(user_id, match_id, active).await;

        let entry = self.inner.presence.get(user_id).await.unwrap_or_default();
        let shown = active && entry.visible_online();

        self.dispatcher()
            .send_to_user(
                partner,
                ServerFrame::ChatPartnerActive {
                    user_id,
                    match_id,
                    active: shown,
                    in_chat: shown,
                },
            )
            .await;
        self.dispatcher().send_to_user(partner, entry.status_frame(user_id)).await;
        Ok(())
    }

    /// Persists the ghost-mode flag and re-announces the user's presence.
    pub async fn set_ghost_mode(&self, user_id: Uuid, enabled: bool) -> Result<(), RealtimeError> {
        let found = self.store().run(move |db| db.set_ghost_mode(user_id, enabled)).await?;
        if !found {
            return Err(RealtimeError::NotFound("user"));
        }

        if let Some(entry) = self.inner.presence.set_ghost(user_id, enabled).await {
            self.dispatcher().broadcast_all(entry.status_frame(user_id)).await;
            self.broadcast_online_count().await;
        }
        info!("{} turned ghost mode {}", user_id, if enabled { "on" } else { "off" });
        Ok(())
    }

    /// Connected users that are not hiding in ghost mode.
    pub async fn online_count(&self) -> usize {
        self.inner.presence.online_count().await
    }

    pub async fn broadcast_online_count(&self) {
        let count = self.online_count().await;
        self.dispatcher()
            .broadcast_all(ServerFrame::OnlineCountUpdate { count })
            .await;
    }

    pub async fn presence_of(&self, user_id: Uuid) -> Option<PresenceEntry> {
        self.inner.presence.get(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::GatewayConfig;
    use crate::test_support::{attach, conversation, drain, gateway, gateway_with, user};

    fn status_of(frames: &[ServerFrame], who: Uuid) -> Vec<(PresenceStatus, Option<Uuid>)> {
        frames
            .iter()
            .filter_map(|f| match f {
                ServerFrame::UserStatus {
                    user_id,
                    status,
                    in_chat_match,
                    ..
                } if *user_id == who => Some((*status, *in_chat_match)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn connect_snapshots_and_announces() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");

        let (_a, mut alice_rx) = gw.connect(alice).await.unwrap();
        drain(&mut alice_rx);

        let (_b, mut bob_rx) = gw.connect(bob).await.unwrap();

        let to_bob = drain(&mut bob_rx);
        assert_eq!(status_of(&to_bob, alice), vec![(PresenceStatus::Online, None)]);
        assert!(to_bob.iter().any(|f| matches!(f, ServerFrame::OnlineCountUpdate { count: 2 })));

        let to_alice = drain(&mut alice_rx);
        assert_eq!(status_of(&to_alice, bob), vec![(PresenceStatus::Online, None)]);
        assert_eq!(gw.online_count().await, 2);
    }

    #[tokio::test]
    async fn unknown_users_cannot_connect() {
        let gw = gateway();
        assert!(matches!(
            gw.connect(Uuid::new_v4()).await,
            Err(RealtimeError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn reconnect_closes_old_socket_and_stale_disconnect_is_ignored() {
        let gw = gateway();
        let alice = user(&gw, "alice");

        let (first, mut first_rx) = gw.connect(alice).await.unwrap();
        let (second, _second_rx) = gw.connect(alice).await.unwrap();

        let mut closed = false;
        while let Ok(outbound) = first_rx.try_recv() {
            closed |= matches!(outbound, Outbound::Close);
        }
        assert!(closed);

        gw.disconnect(alice, first.conn_id()).await;
        assert!(gw.dispatcher().is_current(alice, second.conn_id()).await);
        assert_eq!(gw.presence_of(alice).await.unwrap().conn_id, Some(second.conn_id()));
    }

    #[tokio::test]
    async fn presence_follows_the_newest_connection() {
        let tracker = PresenceTracker::default();
        let alice = Uuid::new_v4();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        tracker.mark_online(alice, first, false).await;
        tracker.mark_online(alice, second, false).await;

        // The first socket's teardown lands after the second socket came up.
        assert!(tracker.mark_offline(alice, first).await.is_none());
        assert_eq!(tracker.get(alice).await.unwrap().conn_id, Some(second));
        assert_eq!(tracker.online_count().await, 1);

        assert!(tracker.mark_offline(alice, second).await.is_some());
        assert!(tracker.get(alice).await.is_none());
        assert_eq!(tracker.online_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_chat_then_rebroadcasts_offline() {
        let gw = gateway_with(GatewayConfig {
            offline_clear_delay: Duration::from_millis(500),
            ..GatewayConfig::default()
        });
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");
        let chat = conversation(&gw, alice, bob, true);

        let (alice_conn, _alice_rx) = gw.connect(alice).await.unwrap();
        let (_bob_conn, mut bob_rx) = gw.connect(bob).await.unwrap();
        gw.set_active_chat(alice, chat.id, true).await.unwrap();
        drain(&mut bob_rx);

        gw.disconnect(alice, alice_conn.conn_id()).await;
        let immediate = drain(&mut bob_rx);

        let left_at = immediate
            .iter()
            .position(|f| matches!(f, ServerFrame::ChatPartnerActive { active: false, in_chat: false, .. }))
            .unwrap();
        let offline_at = immediate
            .iter()
            .position(|f| matches!(f, ServerFrame::UserStatus { status: PresenceStatus::Offline, .. }))
            .unwrap();
        assert!(left_at < offline_at);
        assert!(immediate.iter().any(|f| matches!(f, ServerFrame::OnlineCountUpdate { count: 1 })));
        assert!(gw.presence_of(alice).await.is_none());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let delayed = drain(&mut bob_rx);
        assert_eq!(status_of(&delayed, alice), vec![(PresenceStatus::Offline, None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_offline_is_skipped_after_reconnect() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");

        let (alice_conn, _rx) = gw.connect(alice).await.unwrap();
        let (_bob_conn, mut bob_rx) = gw.connect(bob).await.unwrap();

        gw.disconnect(alice, alice_conn.conn_id()).await;
        let (_again, _rx2) = gw.connect(alice).await.unwrap();
        drain(&mut bob_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(status_of(&drain(&mut bob_rx), alice).is_empty());
    }

    #[tokio::test]
    async fn ghost_users_read_offline_and_are_not_counted() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");

        let (_a, _alice_rx) = gw.connect(alice).await.unwrap();
        let (_b, mut bob_rx) = gw.connect(bob).await.unwrap();
        drain(&mut bob_rx);

        gw.set_ghost_mode(alice, true).await.unwrap();
        let frames = drain(&mut bob_rx);
        assert_eq!(status_of(&frames, alice), vec![(PresenceStatus::Offline, None)]);
        assert_eq!(gw.online_count().await, 1);

        let chat = conversation(&gw, alice, bob, true);
        gw.set_active_chat(alice, chat.id, true).await.unwrap();
        let frames = drain(&mut bob_rx);
        assert!(frames.iter().any(|f| matches!(f, ServerFrame::ChatPartnerActive { active: false, .. })));

        assert!(matches!(
            gw.set_ghost_mode(Uuid::new_v4(), true).await,
            Err(RealtimeError::NotFound("user"))
        ));
    }

    #[tokio::test]
    async fn active_chat_requires_participation() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");
        let mallory = user(&gw, "mallory");
        let chat = conversation(&gw, alice, bob, true);
        let _mallory_rx = attach(&gw, mallory).await;

        assert!(matches!(
            gw.set_active_chat(mallory, chat.id, true).await,
            Err(RealtimeError::Unauthorized(_))
        ));
        assert!(matches!(
            gw.set_active_chat(alice, Uuid::new_v4(), true).await,
            Err(RealtimeError::NotFound("conversation"))
        ));
    }
}

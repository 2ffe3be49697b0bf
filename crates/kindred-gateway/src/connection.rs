use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use kindred_types::events::{ClientFrame, ServerFrame};
use kindred_types::models::MatchPool;

use crate::auth::verify_token;
use crate::delivery::OutgoingMessage;
use crate::matching::Swipe;
use crate::{ConnectionHandle, Gateway, Outbound, RealtimeError};

type WsSender = SplitSink<WebSocket, WsMessage>;
type WsReceiver = SplitStream<WebSocket>;

/// Drives one live connection from upgrade to teardown: waits for a valid
/// `auth` frame, then pumps frames both ways until either side goes away.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some((user_id, handle, outbound_rx)) =
        wait_for_auth(&mut sender, &mut receiver, &gateway, &jwt_secret).await
    else {
        warn!("Live client failed to authenticate, closing");
        let _ = sender.send(WsMessage::Close(None)).await;
        return;
    };

    run_connection_loop(sender, receiver, gateway, user_id, handle, outbound_rx).await;
}

async fn send_frame(sender: &mut WsSender, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => sender.send(WsMessage::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize frame: {}", e);
            true
        }
    }
}

/// Only `auth` is accepted until it succeeds. Failed attempts may be retried
/// until the deadline; anything else is answered with `unauthenticated`.
async fn wait_for_auth(
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
    gateway: &Gateway,
    jwt_secret: &str,
) -> Option<(Uuid, ConnectionHandle, UnboundedReceiver<Outbound>)> {
    let deadline = gateway.config().auth_timeout;

    let attempt = tokio::time::timeout(deadline, async {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => return None,
                _ => continue,
            };

            let frame = match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Malformed frame before auth: {}", e);
                    let reply = RealtimeError::InvalidInput("malformed frame".into()).to_frame();
                    if !send_frame(sender, &reply).await {
                        return None;
                    }
                    continue;
                }
            };

            let ClientFrame::Auth { user_id, token } = frame else {
                if !send_frame(sender, &RealtimeError::Unauthenticated.to_frame()).await {
                    return None;
                }
                continue;
            };

            let verified = verify_token(jwt_secret, &token).and_then(|sub| {
                if sub == user_id {
                    Ok(sub)
                } else {
                    Err(RealtimeError::Unauthenticated)
                }
            });
            let connected = match verified {
                Ok(user_id) => gateway.connect(user_id).await,
                Err(e) => Err(e),
            };

            match connected {
                Ok((handle, rx)) => {
                    if !send_frame(sender, &ServerFrame::AuthSuccess { user_id }).await {
                        gateway.disconnect(user_id, handle.conn_id()).await;
                        return None;
                    }
                    return Some((user_id, handle, rx));
                }
                Err(e) => {
                    warn!(target: "kindred::audit", user_id = %user_id, "auth rejected: {}", e);
                    let reply = ServerFrame::AuthError {
                        message: e.public_message(),
                    };
                    if !send_frame(sender, &reply).await {
                        return None;
                    }
                }
            }
        }
        None
    });

    attempt.await.ok().flatten()
}

async fn run_connection_loop(
    mut sender: WsSender,
    mut receiver: WsReceiver,
    gateway: Gateway,
    user_id: Uuid,
    handle: ConnectionHandle,
    mut outbound_rx: UnboundedReceiver<Outbound>,
) {
    let heartbeat_interval = gateway.config().heartbeat_interval;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(Outbound::Frame(frame)) => {
                            if !send_frame(&mut sender, &frame).await {
                                break;
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = sender.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_gateway = gateway.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        if let Err(e) = handle_frame(&recv_gateway, user_id, &recv_handle, frame).await {
                            report(&recv_handle, user_id, &e);
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad frame: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_handle.send(RealtimeError::InvalidInput("malformed frame".into()).to_frame());
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(user_id, handle.conn_id()).await;
}

/// Sends the error back on the connection that caused it.
fn report(handle: &ConnectionHandle, user_id: Uuid, err: &RealtimeError) {
    match err {
        RealtimeError::Storage(e) => error!("Frame from {} failed: {:#}", user_id, e),
        RealtimeError::Unauthorized(_) => {}
        other => debug!("Frame from {} rejected: {}", user_id, other),
    }
    handle.send(err.to_frame());
}

/// Routes one authenticated frame to the gateway operation it names.
pub async fn handle_frame(
    gateway: &Gateway,
    user_id: Uuid,
    handle: &ConnectionHandle,
    frame: ClientFrame,
) -> Result<(), RealtimeError> {
    match frame {
        ClientFrame::Auth { .. } => {
            debug!("{} sent auth on an authenticated connection", user_id);
        }

        ClientFrame::Message {
            match_id,
            receiver_id,
            content,
            kind,
            reply_to_id,
        } => {
            let outgoing = OutgoingMessage {
                match_id,
                receiver_id,
                content,
                kind,
                reply_to_id,
            };
            gateway.send_message(user_id, outgoing, false).await?;
        }

        ClientFrame::TypingStatus { match_id, is_typing } => {
            gateway.set_typing(user_id, match_id, is_typing).await?;
        }

        ClientFrame::MessageRead { message_id } => {
            gateway.mark_read(user_id, message_id).await?;
        }

        ClientFrame::ActiveChat { match_id, active } => {
            gateway.set_active_chat(user_id, match_id, active).await?;
        }

        ClientFrame::SwipeAction {
            target_user_id,
            action,
            pool,
            target_profile_id,
        } => {
            let pool = pool.unwrap_or(MatchPool::Dating);
            gateway
                .swipe(
                    user_id,
                    Swipe {
                        target_user_id,
                        action,
                        pool,
                        target_profile_id,
                    },
                )
                .await?;
            handle.send(ServerFrame::CardRemoval {
                removed_user_id: target_user_id,
                action,
                pool,
            });
        }

        ClientFrame::GetOnlineCount {} => {
            let count = gateway.online_count().await;
            handle.send(ServerFrame::OnlineCountUpdate { count });
        }

        ClientFrame::Ping {} => {
            handle.send(ServerFrame::Pong {});
        }

        call => {
            let (kind, signal) = call
                .into_call_signal()
                .map_err(|_| RealtimeError::InvalidInput("unsupported frame".into()))?;
            gateway.relay_call_signal(user_id, kind, signal).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{attach, conversation, drain, gateway, user};
    use serde_json::json;

    async fn dispatch(gw: &Gateway, user_id: Uuid, handle: &ConnectionHandle, raw: serde_json::Value) {
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        if let Err(e) = handle_frame(gw, user_id, handle, frame).await {
            report(handle, user_id, &e);
        }
    }

    #[tokio::test]
    async fn ping_and_online_count_answer_the_caller() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let (handle, mut rx) = gw.connect(alice).await.unwrap();
        drain(&mut rx);

        dispatch(&gw, alice, &handle, json!({ "type": "ping" })).await;
        dispatch(&gw, alice, &handle, json!({ "type": "get_online_count" })).await;

        let frames = drain(&mut rx);
        assert!(matches!(frames[0], ServerFrame::Pong {}));
        assert!(matches!(frames[1], ServerFrame::OnlineCountUpdate { count: 1 }));
    }

    #[tokio::test]
    async fn message_frame_is_delivered_and_failures_become_error_frames() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");
        let chat = conversation(&gw, alice, bob, true);
        let (handle, mut alice_rx) = gw.connect(alice).await.unwrap();
        let mut bob_rx = attach(&gw, bob).await;
        drain(&mut alice_rx);

        dispatch(
            &gw,
            alice,
            &handle,
            json!({ "type": "message", "matchId": chat.id, "receiverId": bob, "content": "hey" }),
        )
        .await;
        assert!(drain(&mut bob_rx)
            .iter()
            .any(|f| matches!(f, ServerFrame::NewMessage { message, .. } if message.content == "hey")));

        dispatch(
            &gw,
            alice,
            &handle,
            json!({ "type": "message", "matchId": Uuid::new_v4(), "receiverId": bob, "content": "hey" }),
        )
        .await;
        let frames = drain(&mut alice_rx);
        assert!(frames
            .iter()
            .any(|f| matches!(f, ServerFrame::Error { code, .. } if code == "not_found")));
    }

    #[tokio::test]
    async fn swipe_frame_is_acknowledged_with_card_removal() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");
        let (handle, mut rx) = gw.connect(alice).await.unwrap();
        drain(&mut rx);

        dispatch(
            &gw,
            alice,
            &handle,
            json!({ "type": "swipe_action", "targetUserId": bob, "action": "pass" }),
        )
        .await;

        let frames = drain(&mut rx);
        assert!(frames.iter().any(|f| matches!(
            f,
            ServerFrame::CardRemoval { removed_user_id, pool: MatchPool::Dating, .. } if *removed_user_id == bob
        )));
    }

    #[tokio::test]
    async fn call_frames_are_relayed_and_refusals_reported() {
        let gw = gateway();
        let alice = user(&gw, "alice");
        let bob = user(&gw, "bob");
        let mallory = user(&gw, "mallory");
        let chat = conversation(&gw, alice, bob, true);
        let (handle, mut alice_rx) = gw.connect(alice).await.unwrap();
        let mut bob_rx = attach(&gw, bob).await;
        drain(&mut alice_rx);

        dispatch(
            &gw,
            alice,
            &handle,
            json!({ "type": "webrtc_ice", "matchId": chat.id, "targetUserId": bob, "candidate": "c1" }),
        )
        .await;
        assert!(drain(&mut bob_rx)
            .iter()
            .any(|f| matches!(f, ServerFrame::WebrtcIce(s) if s.from_user_id == alice)));

        dispatch(
            &gw,
            alice,
            &handle,
            json!({ "type": "call_initiate", "matchId": chat.id, "targetUserId": mallory }),
        )
        .await;
        assert!(drain(&mut alice_rx)
            .iter()
            .any(|f| matches!(f, ServerFrame::Error { code, .. } if code == "unauthorized")));
    }
}

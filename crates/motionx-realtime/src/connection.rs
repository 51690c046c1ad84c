use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use motionx_types::api::Claims;
use motionx_types::events::{ChangeFilter, RealtimeCommand, RealtimeEvent, Table};

use crate::hub::Hub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time allowed between upgrade and the Identify command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Topics = Arc<RwLock<HashMap<String, ChangeFilter>>>;

/// Serve one realtime client: Identify, then any number of
/// Subscribe/Unsubscribe commands. Each change matching a topic's filter is
/// forwarded tagged with that topic. A dropped socket loses everything
/// published while it was gone; clients resubscribe going forward.
pub async fn handle_connection(socket: WebSocket, hub: Hub, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("Realtime client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to realtime", user_id);

    if send_event(&mut sender, &RealtimeEvent::Ready { user_id }).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, hub, user_id).await;
    info!("{} disconnected from realtime", user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    hub: Hub,
    user_id: Uuid,
) {
    // Subscribe before acknowledging any topic so nothing published after
    // the ack can be missed.
    let mut changes = hub.receiver();

    let topics: Topics = Arc::new(RwLock::new(HashMap::new()));
    let send_topics = topics.clone();

    // Replies to commands (acks, errors) go through the send task
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RealtimeEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = changes.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Realtime receiver for {} lagged by {} events", user_id, n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    let matching: Vec<String> = {
                        let topics = send_topics.read().unwrap_or_else(|e| e.into_inner());
                        topics
                            .iter()
                            .filter(|(_, filter)| filter.matches(&event))
                            .map(|(topic, _)| topic.clone())
                            .collect()
                    };

                    for topic in matching {
                        let msg = RealtimeEvent::Change { topic, event: event.clone() };
                        if send_event(&mut sender, &msg).await.is_err() {
                            return;
                        }
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(reply) = reply else { break };
                    if send_event(&mut sender, &reply).await.is_err() {
                        break;
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
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_topics = topics.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(reply) = handle_command(user_id, cmd, &recv_topics) {
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            preview(&text)
                        );
                        let _ = reply_tx.send(RealtimeEvent::Error {
                            message: format!("bad command: {}", e),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

fn handle_command(user_id: Uuid, cmd: RealtimeCommand, topics: &Topics) -> Option<RealtimeEvent> {
    match cmd {
        RealtimeCommand::Identify { .. } => None, // Already handled

        RealtimeCommand::Subscribe { topic, filter } => {
            let Some(filter) = restrict(user_id, filter) else {
                warn!("{} tried to subscribe to another user's {}", user_id, topic);
                return Some(RealtimeEvent::Error {
                    message: format!("not allowed to subscribe to {}", topic),
                });
            };
            debug!("{} subscribing to {} ({:?})", user_id, topic, filter.table);
            topics
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(topic.clone(), filter);
            Some(RealtimeEvent::Subscribed { topic })
        }

        RealtimeCommand::Unsubscribe { topic } => {
            debug!("{} unsubscribing from {}", user_id, topic);
            topics
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&topic);
            None
        }
    }
}

/// First 200 characters of a raw frame, for logs.
fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Notifications only ever reach their recipient. An unfiltered
/// notification subscription is narrowed to the caller.
fn restrict(user_id: Uuid, filter: ChangeFilter) -> Option<ChangeFilter> {
    if filter.table != Table::Notifications {
        return Some(filter);
    }
    match &filter.eq {
        None => Some(filter.eq("user_id", user_id)),
        Some(eq) if eq.column == "user_id" && eq.value == user_id.to_string() => Some(filter),
        Some(_) => None,
    }
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(RealtimeCommand::Identify { token }) =
                    serde_json::from_str::<RealtimeCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &RealtimeEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        warn!("Failed to encode realtime event: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribe(filter: ChangeFilter) -> RealtimeCommand {
        RealtimeCommand::Subscribe {
            topic: "inbox".into(),
            filter,
        }
    }

    #[test]
    fn notifications_are_pinned_to_the_caller() {
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        let topics: Topics = Arc::default();

        let reply = handle_command(
            me,
            subscribe(ChangeFilter::table(Table::Notifications).eq("user_id", other)),
            &topics,
        );
        assert!(matches!(reply, Some(RealtimeEvent::Error { .. })));
        assert!(topics.read().unwrap().is_empty());

        let reply = handle_command(me, subscribe(ChangeFilter::table(Table::Notifications)), &topics);
        assert!(matches!(reply, Some(RealtimeEvent::Subscribed { .. })));
        assert_eq!(
            topics.read().unwrap()["inbox"],
            ChangeFilter::table(Table::Notifications).eq("user_id", me)
        );
    }

    #[test]
    fn preview_cuts_on_char_boundaries() {
        let raw = format!("{}é not json", "a".repeat(199));
        let cut = preview(&raw);
        assert_eq!(cut.chars().count(), 200);
        assert!(cut.ends_with('é'));
    }

    #[test]
    fn other_tables_pass_through() {
        let topics: Topics = Arc::default();
        let filter = ChangeFilter::table(Table::Messages).eq("room_id", Uuid::new_v4());
        handle_command(Uuid::new_v4(), subscribe(filter.clone()), &topics);
        assert_eq!(topics.read().unwrap()["inbox"], filter);
    }
}

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use ballot_db::Database;
use ballot_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a single viewer connection. Viewers do not need to sign in;
/// they subscribe to polls by id and receive every stored update.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();

    debug!("Gateway connection {} opened", conn_id);

    if send_event(&mut sender, &GatewayEvent::Ready).await.is_err() {
        return;
    }

    // Subscribe before any poll is loaded so no update slips between the
    // snapshot and the live stream.
    let mut broadcast_rx = dispatcher.subscribe();

    // Replies meant for this connection only (snapshots, not-found).
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();
    let recv_subscriptions = subscriptions;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + direct replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(poll_id) = event.poll_id() {
                        let wanted = send_subscriptions
                            .read()
                            .map(|subs| subs.contains(&poll_id))
                            .unwrap_or(false);
                        if !wanted {
                            continue;
                        }
                    }

                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = direct_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
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

    // Read commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&db, cmd, &recv_subscriptions, &direct_tx).await;
                    }
                    Err(e) => {
                        warn!(
                            "Connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
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

    debug!("Gateway connection {} closed", conn_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn handle_command(
    db: &Arc<Database>,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
    direct_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Subscribe { poll_id } => {
            if let Ok(mut subs) = subscriptions.write() {
                subs.insert(poll_id);
            }

            let lookup_db = db.clone();
            let snapshot = tokio::task::spawn_blocking(move || lookup_db.get_poll(&poll_id.to_string()))
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r);

            match snapshot {
                Ok(Some(poll)) => {
                    debug!("Subscribed to poll {}", poll_id);
                    let _ = direct_tx.send(GatewayEvent::PollUpdate { poll });
                }
                Ok(None) => {
                    drop_subscription(subscriptions, poll_id);
                    let _ = direct_tx.send(GatewayEvent::PollNotFound { poll_id });
                }
                Err(e) => {
                    // Surfaced to the viewer the same way as a missing poll.
                    warn!("Failed to load poll {} for subscriber: {:#}", poll_id, e);
                    drop_subscription(subscriptions, poll_id);
                    let _ = direct_tx.send(GatewayEvent::PollNotFound { poll_id });
                }
            }
        }

        GatewayCommand::Unsubscribe { poll_id } => {
            drop_subscription(subscriptions, poll_id);
        }
    }
}

fn drop_subscription(subscriptions: &Subscriptions, poll_id: Uuid) {
    if let Ok(mut subs) = subscriptions.write() {
        subs.remove(&poll_id);
    }
}

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use ballot_types::events::{GatewayCommand, GatewayEvent};
use ballot_types::models::Poll;

use crate::error::ClientError;

/// What a live poll subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum PollFeed {
    /// The full current record
    Snapshot(Poll),
    /// No poll has this id
    NotFound,
    /// The connection broke; no further updates will arrive
    Failed(String),
}

/// Open feed for one poll. Dropping it aborts the reader task, which closes
/// the connection and releases the server-side subscription.
pub struct PollSubscription {
    poll_id: Uuid,
    rx: mpsc::UnboundedReceiver<PollFeed>,
    task: JoinHandle<()>,
}

impl PollSubscription {
    pub fn poll_id(&self) -> Uuid {
        self.poll_id
    }

    /// Next update, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<PollFeed> {
        self.rx.recv().await
    }
}

impl Drop for PollSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) async fn subscribe(gateway_url: &str, poll_id: Uuid) -> Result<PollSubscription, ClientError> {
    let (socket, _) = tokio_tungstenite::connect_async(gateway_url)
        .await
        .map_err(|e| ClientError::Gateway(e.to_string()))?;
    let (mut sink, mut stream) = socket.split();

    let command = serde_json::to_string(&GatewayCommand::Subscribe { poll_id })?;
    sink.send(Message::Text(command.into()))
        .await
        .map_err(|e| ClientError::Gateway(e.to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Ping(payload)) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    let _ = tx.send(PollFeed::Failed(e.to_string()));
                    return;
                }
            };

            let event = match serde_json::from_str::<GatewayEvent>(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Ignoring malformed gateway event: {}", e);
                    continue;
                }
            };

            match event {
                GatewayEvent::PollUpdate { poll } if poll.id == poll_id => {
                    if tx.send(PollFeed::Snapshot(poll)).is_err() {
                        return;
                    }
                }
                GatewayEvent::PollNotFound { poll_id: missing } if missing == poll_id => {
                    let _ = tx.send(PollFeed::NotFound);
                    return;
                }
                _ => {}
            }
        }

        debug!("Gateway feed for poll {} closed", poll_id);
        let _ = tx.send(PollFeed::Failed("gateway connection closed".into()));
    });

    Ok(PollSubscription { poll_id, rx, task })
}

use std::sync::Arc;

use tokio::sync::broadcast;

use ballot_types::events::GatewayEvent;

/// Fans stored poll changes out to every connected viewer.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events; each connection filters by the
    /// polls it subscribed to
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_types::models::Poll;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let d = Dispatcher::new();
        let mut rx = d.subscribe();
        let poll = Poll {
            id: Uuid::new_v4(),
            question: "q".into(),
            options: vec![],
            created_by: "anonymous".into(),
            created_at: chrono::Utc::now(),
            voted_uids: BTreeSet::new(),
        };

        d.broadcast(GatewayEvent::PollUpdate { poll: poll.clone() });

        match rx.recv().await.unwrap() {
            GatewayEvent::PollUpdate { poll: got } => assert_eq!(got, poll),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}

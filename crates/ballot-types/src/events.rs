use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Poll;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection accepted; the client may now subscribe
    Ready,

    /// Full poll record, sent on subscribe and after every stored change
    PollUpdate { poll: Poll },

    /// The subscribed id has no poll record
    PollNotFound { poll_id: Uuid },
}

impl GatewayEvent {
    /// Returns the poll_id if this event is scoped to a single poll.
    /// Events that return `None` are connection-level.
    pub fn poll_id(&self) -> Option<Uuid> {
        match self {
            Self::PollUpdate { poll } => Some(poll.id),
            Self::PollNotFound { poll_id } => Some(*poll_id),
            Self::Ready => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Start receiving updates for a poll. The server answers with the
    /// current record or `PollNotFound`.
    Subscribe { poll_id: Uuid },

    /// Stop receiving updates for a poll
    Unsubscribe { poll_id: Uuid },
}

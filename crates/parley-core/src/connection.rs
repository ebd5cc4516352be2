use parley_shared::protocol::ServerEvent;
use parley_shared::types::ConnectionId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Send side of one client connection.
///
/// Cloning is cheap; every clone feeds the same outbound queue. The
/// transport owns the receiving half and writes queued events to the wire.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the bounded queue behind it.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event without waiting.
    ///
    /// Returns `false` when the event was dropped because the queue is full
    /// or the transport has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!(conn = %self.id, event = event.name(), "outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

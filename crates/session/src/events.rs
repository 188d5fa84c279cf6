use tokio::sync::mpsc;

use super::ids::SessionId;
use super::types::{Message, SessionSummary};

/// Change notification emitted after every successful store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionCreated { session: SessionSummary },
    SessionSelected { session_id: SessionId },
    /// `current` is the selection after removal, `None` once the store is empty.
    SessionRemoved {
        session_id: SessionId,
        current: Option<SessionId>,
    },
    MessageAppended {
        session_id: SessionId,
        message: Message,
    },
    BusyChanged { session_id: SessionId, busy: bool },
}

impl StoreEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionCreated { session } => session.id,
            Self::SessionSelected { session_id }
            | Self::SessionRemoved { session_id, .. }
            | Self::MessageAppended { session_id, .. }
            | Self::BusyChanged { session_id, .. } => *session_id,
        }
    }
}

/// Receives store events synchronously, in mutation order.
///
/// Called while the store is locked: implementations must return quickly and
/// must not call back into the store.
pub trait StoreObserver: Send + Sync {
    fn on_event(&self, event: &StoreEvent);

    /// Closed observers are dropped by the store on the next notification.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Forwards events into an unbounded channel so consumers can react off the
/// store's critical section.
pub(crate) struct ChannelObserver {
    sender: mpsc::UnboundedSender<StoreEvent>,
}

impl ChannelObserver {
    pub(crate) fn new(sender: mpsc::UnboundedSender<StoreEvent>) -> Self {
        Self { sender }
    }
}

impl StoreObserver for ChannelObserver {
    fn on_event(&self, event: &StoreEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.sender.send(event.clone());
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

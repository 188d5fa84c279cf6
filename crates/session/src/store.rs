use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snafu::{OptionExt, ensure};
use tokio::sync::mpsc;

use super::error::{SessionBusySnafu, SessionNotFoundSnafu, SessionResult};
use super::events::{ChannelObserver, StoreEvent, StoreObserver};
use super::ids::SessionId;
use super::types::{ChatSession, Message, SessionSummary};

struct SessionEntry {
    session: ChatSession,
    busy: bool,
}

#[derive(Default)]
struct StoreState {
    // Insertion order is listing order.
    sessions: Vec<SessionEntry>,
    current: Option<SessionId>,
    observers: Vec<Arc<dyn StoreObserver>>,
}

impl StoreState {
    fn entry(&self, session_id: SessionId) -> Option<&SessionEntry> {
        self.sessions
            .iter()
            .find(|entry| entry.session.id() == session_id)
    }

    fn entry_mut(&mut self, session_id: SessionId) -> Option<&mut SessionEntry> {
        self.sessions
            .iter_mut()
            .find(|entry| entry.session.id() == session_id)
    }

    fn emit(&mut self, event: StoreEvent) {
        self.observers.retain(|observer| !observer.is_closed());
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

/// Single source of truth for chat sessions, the current selection and the
/// per-session busy flags.
///
/// All mutations serialize through one lock, and observers are notified
/// before that lock is released, so every observer sees events in exactly the
/// order the mutations were applied.
#[derive(Default)]
pub struct SessionStore {
    state: Mutex<StoreState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Store state is consistent after every statement that can panic, so a
    // poisoned lock is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_observer(&self, observer: Arc<dyn StoreObserver>) {
        self.lock().observers.push(observer);
    }

    /// Registers a channel-backed observer and returns its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.add_observer(Arc::new(ChannelObserver::new(sender)));
        receiver
    }

    /// Creates a greeting-seeded session and makes it current.
    pub fn create_session(&self) -> SessionId {
        let session = ChatSession::new();
        let session_id = session.id();
        let summary = session.summary();

        let mut state = self.lock();
        state.sessions.push(SessionEntry {
            session,
            busy: false,
        });
        state.current = Some(session_id);
        state.emit(StoreEvent::SessionCreated { session: summary });
        state.emit(StoreEvent::SessionSelected { session_id });

        tracing::info!(session_id = %session_id, "created chat session");
        session_id
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.lock()
            .sessions
            .iter()
            .map(|entry| entry.session.summary())
            .collect()
    }

    pub fn select_session(&self, session_id: SessionId) -> SessionResult<()> {
        let mut state = self.lock();
        ensure!(
            state.entry(session_id).is_some(),
            SessionNotFoundSnafu {
                stage: "select-session",
                session_id,
            }
        );

        state.current = Some(session_id);
        state.emit(StoreEvent::SessionSelected { session_id });
        Ok(())
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.lock().current
    }

    pub fn current_session(&self) -> Option<ChatSession> {
        let state = self.lock();
        let current = state.current?;
        state.entry(current).map(|entry| entry.session.clone())
    }

    pub fn session(&self, session_id: SessionId) -> Option<ChatSession> {
        self.lock()
            .entry(session_id)
            .map(|entry| entry.session.clone())
    }

    pub fn messages(&self, session_id: SessionId) -> SessionResult<Vec<Message>> {
        self.lock()
            .entry(session_id)
            .map(|entry| entry.session.messages().to_vec())
            .context(SessionNotFoundSnafu {
                stage: "list-messages",
                session_id,
            })
    }

    pub fn is_busy(&self, session_id: SessionId) -> SessionResult<bool> {
        self.lock()
            .entry(session_id)
            .map(|entry| entry.busy)
            .context(SessionNotFoundSnafu {
                stage: "read-busy-flag",
                session_id,
            })
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    pub fn append_message(&self, session_id: SessionId, message: Message) -> SessionResult<()> {
        let mut state = self.lock();
        let entry = state.entry_mut(session_id).context(SessionNotFoundSnafu {
            stage: "append-message",
            session_id,
        })?;

        entry.session.push(message.clone());
        state.emit(StoreEvent::MessageAppended {
            session_id,
            message,
        });
        Ok(())
    }

    /// Removes a session. When it was current, the newest remaining session
    /// becomes current, or the selection clears if none remain.
    pub fn remove_session(&self, session_id: SessionId) -> SessionResult<()> {
        let mut state = self.lock();
        let index = state
            .sessions
            .iter()
            .position(|entry| entry.session.id() == session_id)
            .context(SessionNotFoundSnafu {
                stage: "remove-session",
                session_id,
            })?;

        let removed = state.sessions.remove(index);
        if state.current == Some(session_id) {
            state.current = state.sessions.last().map(|entry| entry.session.id());
        }

        let current = state.current;
        state.emit(StoreEvent::SessionRemoved {
            session_id,
            current,
        });

        tracing::info!(
            session_id = %session_id,
            was_busy = removed.busy,
            current = ?current,
            "removed chat session"
        );
        Ok(())
    }

    /// Atomically claims the session's busy flag and appends the user's turn.
    ///
    /// The returned guard clears the flag when dropped.
    pub(crate) fn begin_dispatch(
        &self,
        session_id: SessionId,
        user_message: Message,
    ) -> SessionResult<DispatchGuard<'_>> {
        let mut state = self.lock();
        let entry = state.entry_mut(session_id).context(SessionNotFoundSnafu {
            stage: "begin-dispatch",
            session_id,
        })?;
        ensure!(
            !entry.busy,
            SessionBusySnafu {
                stage: "begin-dispatch",
                session_id,
            }
        );

        entry.busy = true;
        entry.session.push(user_message.clone());
        state.emit(StoreEvent::BusyChanged {
            session_id,
            busy: true,
        });
        state.emit(StoreEvent::MessageAppended {
            session_id,
            message: user_message,
        });
        drop(state);

        Ok(DispatchGuard {
            store: self,
            session_id,
        })
    }

    fn finish_dispatch(&self, session_id: SessionId) {
        let mut state = self.lock();
        match state.entry_mut(session_id) {
            Some(entry) if entry.busy => {
                entry.busy = false;
                state.emit(StoreEvent::BusyChanged {
                    session_id,
                    busy: false,
                });
            }
            Some(_) => {}
            None => {
                tracing::debug!(
                    session_id = %session_id,
                    "session removed while dispatch was in flight"
                );
            }
        }
    }
}

/// Scoped ownership of one session's busy flag.
pub(crate) struct DispatchGuard<'a> {
    store: &'a SessionStore,
    session_id: SessionId,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.store.finish_dispatch(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::error::SessionError;
    use crate::types::{GREETING, Sender};

    #[derive(Default)]
    struct RecordingObserver {
        events: StdMutex<Vec<StoreEvent>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<StoreEvent> {
            self.events
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default()
        }
    }

    impl StoreObserver for RecordingObserver {
        fn on_event(&self, event: &StoreEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
        }
    }

    #[test]
    fn create_session_seeds_greeting_and_becomes_current() {
        let store = SessionStore::new();
        assert!(store.is_empty());

        let first = store.create_session();
        let second = store.create_session();

        assert_eq!(store.list_sessions().len(), 2);
        assert_eq!(store.current_session_id(), Some(second));

        let messages = store.messages(first).expect("session exists");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender(), Sender::Bot);
        assert_eq!(messages[0].text_content(), Some(GREETING));
    }

    #[test]
    fn list_sessions_keeps_insertion_order() {
        let store = SessionStore::new();
        let ids = (0..3).map(|_| store.create_session()).collect::<Vec<_>>();

        let listed = store
            .list_sessions()
            .into_iter()
            .map(|summary| summary.id)
            .collect::<Vec<_>>();
        assert_eq!(listed, ids);
    }

    #[test]
    fn select_unknown_session_reports_not_found() {
        let store = SessionStore::new();
        let known = store.create_session();
        let other = SessionStore::new().create_session();

        let result = store.select_session(other);
        assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
        assert_eq!(store.current_session_id(), Some(known));
    }

    #[test]
    fn append_to_stale_session_fails() {
        let store = SessionStore::new();
        let session_id = store.create_session();
        store.remove_session(session_id).expect("removable");

        let result = store.append_message(session_id, Message::user_text("late"));
        assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
    }

    #[test]
    fn removing_current_session_reselects_newest_remaining() {
        let store = SessionStore::new();
        let first = store.create_session();
        let second = store.create_session();
        let third = store.create_session();

        store.select_session(second).expect("exists");
        store.remove_session(second).expect("removable");
        assert_eq!(store.current_session_id(), Some(third));

        store.remove_session(first).expect("removable");
        assert_eq!(store.current_session_id(), Some(third));

        store.remove_session(third).expect("removable");
        assert_eq!(store.current_session_id(), None);
        assert!(store.current_session().is_none());
    }

    #[test]
    fn observers_see_mutations_in_order() {
        let store = SessionStore::new();
        let observer = Arc::new(RecordingObserver::default());
        store.add_observer(observer.clone());

        let session_id = store.create_session();
        let message = Message::user_text("hi");
        store
            .append_message(session_id, message.clone())
            .expect("session exists");

        let events = observer.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StoreEvent::SessionCreated { session } if session.id == session_id));
        assert_eq!(events[1], StoreEvent::SessionSelected { session_id });
        assert_eq!(
            events[2],
            StoreEvent::MessageAppended {
                session_id,
                message
            }
        );
    }

    #[test]
    fn failed_mutations_do_not_notify() {
        let store = SessionStore::new();
        let observer = Arc::new(RecordingObserver::default());
        store.add_observer(observer.clone());

        let stranger = SessionStore::new().create_session();
        assert!(store.select_session(stranger).is_err());
        assert!(store.append_message(stranger, Message::user_text("x")).is_err());
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_events_and_are_pruned_when_dropped() {
        let store = SessionStore::new();
        let mut receiver = store.subscribe();
        let session_id = store.create_session();

        let created = receiver.recv().await.expect("created event");
        assert_eq!(created.session_id(), session_id);

        drop(receiver);
        store.create_session();
        assert!(store.lock().observers.is_empty());
    }

    #[test]
    fn busy_guard_claims_once_and_releases_on_drop() {
        let store = SessionStore::new();
        let session_id = store.create_session();

        let guard = store
            .begin_dispatch(session_id, Message::user_text("first"))
            .expect("idle session");
        assert_eq!(store.is_busy(session_id).ok(), Some(true));

        let rejected = store.begin_dispatch(session_id, Message::user_text("second"));
        assert!(matches!(rejected, Err(SessionError::SessionBusy { .. })));
        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(2));

        drop(guard);
        assert_eq!(store.is_busy(session_id).ok(), Some(false));
    }

    #[test]
    fn busy_release_after_removal_is_a_no_op() {
        let store = SessionStore::new();
        let session_id = store.create_session();
        let guard = store
            .begin_dispatch(session_id, Message::user_text("hello"))
            .expect("idle session");

        store.remove_session(session_id).expect("removable");
        drop(guard);
        assert!(store.is_busy(session_id).is_err());
    }
}

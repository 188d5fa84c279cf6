#![deny(unsafe_code)]

//! Chat session state and message dispatch.
//!
//! [`SessionStore`] owns every session, the current selection and the
//! per-session busy flags, and notifies observers on each mutation.
//! [`MessageDispatcher`] is the only caller of the generation provider: it
//! appends the user's turn, awaits the provider and appends the reply.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod ids;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{DispatchOptions, MessageDispatcher, SendOutcome, build_text_history};
pub use error::{SessionError, SessionResult};
pub use events::{StoreEvent, StoreObserver};
pub use ids::{MessageId, SessionId};
pub use store::SessionStore;
pub use types::{
    ChatSession, DEFAULT_CHAT_TITLE, GREETING, GenerationMode, Message, MessageContent, Sender,
    SessionSummary,
};

use std::time::{SystemTime, UNIX_EPOCH};

use super::ids::{MessageId, SessionId};

/// Bot greeting seeded into every new session.
pub const GREETING: &str = "Hello! I'm Parley. How can I help you today?";

/// Title shown until the user has sent a text message.
pub const DEFAULT_CHAT_TITLE: &str = "New chat";

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Bot => "Parley",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    /// URL-like handle to a generated image.
    Image(String),
}

/// Which backend capability a send should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GenerationMode {
    #[default]
    Text,
    Image,
}

/// One conversational turn. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    sender: Sender,
    content: MessageContent,
    created_at_unix_seconds: u64,
}

impl Message {
    pub fn new(sender: Sender, content: MessageContent) -> Self {
        Self {
            id: MessageId::new_v7(),
            sender,
            content,
            created_at_unix_seconds: unix_timestamp_seconds(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Sender::User, MessageContent::Text(text.into()))
    }

    pub fn bot_text(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, MessageContent::Text(text.into()))
    }

    pub fn bot_image(reference: impl Into<String>) -> Self {
        Self::new(Sender::Bot, MessageContent::Image(reference.into()))
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    pub fn created_at_unix_seconds(&self) -> u64 {
        self.created_at_unix_seconds
    }

    /// Text body, or `None` for image turns.
    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Image(_) => None,
        }
    }
}

/// Ordered conversation thread. Always holds at least the seeded greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    id: SessionId,
    messages: Vec<Message>,
    created_at_unix_seconds: u64,
}

impl ChatSession {
    /// Creates a session seeded with the bot greeting.
    pub fn new() -> Self {
        Self {
            id: SessionId::new_v7(),
            messages: vec![Message::bot_text(GREETING)],
            created_at_unix_seconds: unix_timestamp_seconds(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// First user-sent text, falling back to [`DEFAULT_CHAT_TITLE`].
    pub fn title(&self) -> &str {
        self.messages
            .iter()
            .filter(|message| message.sender() == Sender::User)
            .find_map(Message::text_content)
            .unwrap_or(DEFAULT_CHAT_TITLE)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            title: self.title().to_string(),
            created_at_unix_seconds: self.created_at_unix_seconds,
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing row for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub created_at_unix_seconds: u64,
}

pub(crate) fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

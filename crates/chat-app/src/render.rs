use std::sync::Arc;

use parley_llm::Model;
use parley_session::{
    Message, MessageContent, Sender, SessionId, SessionStore, SessionSummary, StoreEvent,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub fn format_message(message: &Message) -> String {
    let name = message.sender().display_name();
    match message.content() {
        MessageContent::Text(text) => format!("{name}: {text}"),
        MessageContent::Image(reference) => format!("{name}: [image] {reference}"),
    }
}

pub fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(format_message)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered chat list; positions are what `/switch` and `/delete` accept.
pub fn format_session_list(sessions: &[SessionSummary], current: Option<SessionId>) -> String {
    if sessions.is_empty() {
        return "no chats".to_string();
    }

    sessions
        .iter()
        .enumerate()
        .map(|(index, session)| {
            let marker = if Some(session.id) == current { '*' } else { ' ' };
            format!("{marker} {}. {}", index + 1, session.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_model_list(models: &[Model], active_model: &str) -> String {
    let mut lines = Vec::with_capacity(models.len() + 1);
    if !models.iter().any(|model| model.id == active_model) {
        lines.push(format!("* {active_model}"));
    }
    for model in models {
        let marker = if model.id == active_model { '*' } else { ' ' };
        let line = match &model.description {
            Some(description) => format!("{marker} {} ({}) - {description}", model.id, model.name),
            None => format!("{marker} {} ({})", model.id, model.name),
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Turns a store event into terminal output, or `None` when nothing should
/// be printed.
///
/// The user's own turns are not echoed. Replies landing in a chat other than
/// the current one are prefixed with that chat's title.
pub fn render_event(store: &SessionStore, event: &StoreEvent) -> Option<String> {
    let current = store.current_session_id();
    match event {
        StoreEvent::SessionCreated { .. } => None,
        StoreEvent::SessionSelected { session_id } => store
            .messages(*session_id)
            .ok()
            .map(|messages| format_transcript(&messages)),
        StoreEvent::SessionRemoved { current: None, .. } => Some("no chats left".to_string()),
        StoreEvent::SessionRemoved {
            current: Some(next),
            ..
        } => store.session(*next).map(|session| {
            format!(
                "-- {} --\n{}",
                session.title(),
                format_transcript(session.messages())
            )
        }),
        StoreEvent::MessageAppended {
            session_id,
            message,
        } => {
            if message.sender() == Sender::User {
                return None;
            }
            if current == Some(*session_id) {
                return Some(format_message(message));
            }
            let title = store
                .session(*session_id)
                .map(|session| session.title().to_string())?;
            Some(format!("[{title}] {}", format_message(message)))
        }
        StoreEvent::BusyChanged {
            session_id,
            busy: true,
        } if current == Some(*session_id) => {
            Some(format!("{} is thinking...", Sender::Bot.display_name()))
        }
        StoreEvent::BusyChanged { .. } => None,
    }
}

/// Background task printing store events to stdout.
pub struct Renderer {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl Renderer {
    /// Prints every event already queued, then stops.
    pub async fn finish(self) {
        let _ = self.shutdown.send(());
        if let Err(error) = self.handle.await {
            tracing::warn!(error = %error, "renderer task failed");
        }
    }
}

pub fn spawn_renderer(store: Arc<SessionStore>) -> Renderer {
    let mut events = store.subscribe();
    let (shutdown, mut shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => print_event(&store, &event),
                    None => break,
                },
                _ = &mut shutdown_rx => {
                    while let Ok(event) = events.try_recv() {
                        print_event(&store, &event);
                    }
                    break;
                }
            }
        }
    });
    Renderer { handle, shutdown }
}

fn print_event(store: &SessionStore, event: &StoreEvent) {
    tracing::debug!(session_id = %event.session_id(), event = ?event, "render event");
    if let Some(output) = render_event(store, event) {
        println!("{output}");
    }
}

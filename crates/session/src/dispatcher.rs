use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parley_llm::{
    BoxFuture, GenerationProvider, ImageRequest, ImageSize, ProviderError, ProviderMessage,
    ProviderResult, Role, TextRequest,
};
use snafu::ResultExt;

use super::error::{ProviderSnafu, SessionError, SessionResult};
use super::ids::SessionId;
use super::store::SessionStore;
use super::types::{GenerationMode, Message, MessageContent, Sender};

/// Per-call generation parameters, swappable at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    pub model_id: String,
    pub image_size: ImageSize,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    /// `None` waits for the provider indefinitely.
    pub timeout: Option<Duration>,
}

impl DispatchOptions {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            image_size: ImageSize::default(),
            preamble: None,
            temperature: None,
            max_tokens: None,
            timeout: None,
        }
    }

    pub fn with_image_size(mut self, image_size: ImageSize) -> Self {
        self.image_size = image_size;
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Input was blank after trimming; nothing was appended or sent.
    EmptyInput,
    /// The bot reply that was appended to the session.
    Delivered(Message),
}

/// Sends user turns through a session and integrates the provider's reply.
///
/// This is the only component that talks to the [`GenerationProvider`]. At most
/// one send per session is in flight; sends to different sessions run
/// independently.
pub struct MessageDispatcher {
    store: Arc<SessionStore>,
    provider: Arc<dyn GenerationProvider>,
    options: ArcSwap<DispatchOptions>,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn GenerationProvider>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            provider,
            options: ArcSwap::from_pointee(options),
        }
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    pub fn options(&self) -> Arc<DispatchOptions> {
        self.options.load_full()
    }

    pub fn set_options(&self, options: DispatchOptions) {
        self.options.store(Arc::new(options));
    }

    /// Switches the text model for subsequent sends; in-flight sends keep theirs.
    pub fn set_model(&self, model_id: impl Into<String>) {
        let mut options = (*self.options.load_full()).clone();
        options.model_id = model_id.into();
        self.set_options(options);
    }

    /// Appends `text` as a user turn, asks the provider for a reply and
    /// appends that reply.
    ///
    /// Provider failures leave the user turn in place. The session's busy flag
    /// is released on every exit path, including when this future is dropped.
    pub async fn send_user_message(
        &self,
        session_id: SessionId,
        text: &str,
        mode: GenerationMode,
    ) -> SessionResult<SendOutcome> {
        if text.trim().is_empty() {
            tracing::debug!(session_id = %session_id, "ignoring blank message");
            return Ok(SendOutcome::EmptyInput);
        }

        let _busy = self
            .store
            .begin_dispatch(session_id, Message::user_text(text))
            .inspect_err(|error| {
                tracing::warn!(session_id = %session_id, error = %error, "send rejected");
            })?;

        let options = self.options.load_full();
        let provider_id = self.provider.id().to_string();
        tracing::debug!(
            session_id = %session_id,
            provider_id = %provider_id,
            mode = ?mode,
            "dispatching to provider"
        );

        let content = match mode {
            GenerationMode::Text => {
                let history = build_text_history(&self.store.messages(session_id)?);
                let mut request = TextRequest::new(options.model_id.clone(), history);
                if let Some(preamble) = &options.preamble {
                    request = request.with_preamble(preamble.clone());
                }
                if let Some(temperature) = options.temperature {
                    request = request.with_temperature(temperature);
                }
                if let Some(max_tokens) = options.max_tokens {
                    request = request.with_max_tokens(max_tokens);
                }

                let reply = with_deadline(options.timeout, self.provider.generate_text(request))
                    .await
                    .context(ProviderSnafu {
                        stage: "generate-text",
                        session_id,
                        provider_id: provider_id.clone(),
                    })
                    .inspect_err(|error| log_provider_failure(session_id, error))?;
                MessageContent::Text(reply)
            }
            GenerationMode::Image => {
                let request = ImageRequest::new(text, options.image_size);
                let image = with_deadline(options.timeout, self.provider.generate_image(request))
                    .await
                    .context(ProviderSnafu {
                        stage: "generate-image",
                        session_id,
                        provider_id: provider_id.clone(),
                    })
                    .inspect_err(|error| log_provider_failure(session_id, error))?;
                MessageContent::Image(image.into_inner())
            }
        };

        let reply = Message::new(Sender::Bot, content);
        self.store.append_message(session_id, reply.clone())?;
        Ok(SendOutcome::Delivered(reply))
    }
}

/// Projects a session onto provider chat turns.
///
/// Image turns carry no text and are left out rather than rejected.
pub fn build_text_history(messages: &[Message]) -> Vec<ProviderMessage> {
    messages
        .iter()
        .filter_map(|message| {
            let text = message.text_content()?;
            let role = match message.sender() {
                Sender::User => Role::User,
                Sender::Bot => Role::Assistant,
            };
            Some(ProviderMessage::new(role, text))
        })
        .collect()
}

async fn with_deadline<T>(
    timeout: Option<Duration>,
    call: BoxFuture<'_, ProviderResult<T>>,
) -> ProviderResult<T> {
    let Some(after) = timeout else {
        return call.await;
    };

    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::TimedOut {
            stage: "provider-deadline",
            after,
        }),
    }
}

fn log_provider_failure(session_id: SessionId, error: &SessionError) {
    tracing::warn!(session_id = %session_id, error = %error, "provider call failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StoreEvent;
    use crate::test_support::{GatedProvider, ScriptedProvider};
    use crate::types::GREETING;

    fn dispatcher_with(
        provider: Arc<dyn GenerationProvider>,
    ) -> (Arc<SessionStore>, MessageDispatcher) {
        let store = Arc::new(SessionStore::new());
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            provider,
            DispatchOptions::new("test-model"),
        );
        (store, dispatcher)
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let provider = Arc::new(ScriptedProvider::replying("unused"));
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let session_id = store.create_session();

        for blank in ["", "   ", "\n\t "] {
            let outcome = dispatcher
                .send_user_message(session_id, blank, GenerationMode::Text)
                .await
                .expect("blank input is not an error");
            assert_eq!(outcome, SendOutcome::EmptyInput);
        }

        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(1));
        assert_eq!(store.is_busy(session_id).ok(), Some(false));
        assert_eq!(provider.text_calls(), 0);
    }

    #[tokio::test]
    async fn successful_text_send_appends_user_then_bot() {
        let provider = Arc::new(ScriptedProvider::replying("Hi there!"));
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let session_id = store.create_session();
        let mut events = store.subscribe();

        let outcome = dispatcher
            .send_user_message(session_id, "hello", GenerationMode::Text)
            .await
            .expect("send succeeds");

        let messages = store.messages(session_id).expect("session exists");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].sender(), Sender::User);
        assert_eq!(messages[1].text_content(), Some("hello"));
        assert_eq!(messages[2].sender(), Sender::Bot);
        assert_eq!(messages[2].text_content(), Some("Hi there!"));
        assert_eq!(outcome, SendOutcome::Delivered(messages[2].clone()));
        assert_eq!(store.is_busy(session_id).ok(), Some(false));

        let mut observed = Vec::new();
        while let Ok(event) = events.try_recv() {
            observed.push(event);
        }
        assert_eq!(observed.len(), 4);
        assert_eq!(observed[0], StoreEvent::BusyChanged { session_id, busy: true });
        assert!(matches!(&observed[1], StoreEvent::MessageAppended { message, .. } if message.sender() == Sender::User));
        assert!(matches!(&observed[2], StoreEvent::MessageAppended { message, .. } if message.sender() == Sender::Bot));
        assert_eq!(observed[3], StoreEvent::BusyChanged { session_id, busy: false });
    }

    #[tokio::test]
    async fn text_request_carries_history_and_options() {
        let provider = Arc::new(ScriptedProvider::replying("ok"));
        let store = Arc::new(SessionStore::new());
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            provider.clone(),
            DispatchOptions::new("gpt-test")
                .with_preamble("be terse")
                .with_temperature(0.2)
                .with_max_tokens(256),
        );
        let session_id = store.create_session();
        store
            .append_message(session_id, Message::bot_image("https://img.example/1.png"))
            .expect("session exists");

        dispatcher
            .send_user_message(session_id, "describe it", GenerationMode::Text)
            .await
            .expect("send succeeds");

        let request = provider.last_text_request().expect("provider was called");
        assert_eq!(request.model_id, "gpt-test");
        assert_eq!(request.preamble.as_deref(), Some("be terse"));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(
            request.messages,
            vec![
                ProviderMessage::new(Role::Assistant, GREETING),
                ProviderMessage::new(Role::User, "describe it"),
            ]
        );
    }

    #[tokio::test]
    async fn image_mode_appends_image_reply() {
        let provider = Arc::new(
            ScriptedProvider::replying("unused").with_image("https://img.example/fox.png"),
        );
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let session_id = store.create_session();

        dispatcher
            .send_user_message(session_id, "a red fox", GenerationMode::Image)
            .await
            .expect("send succeeds");

        let messages = store.messages(session_id).expect("session exists");
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[2].content(),
            &MessageContent::Image("https://img.example/fox.png".to_string())
        );

        let request = provider.last_image_request().expect("provider was called");
        assert_eq!(request.prompt, "a red fox");
        assert_eq!(request.count, 1);
        assert_eq!(provider.text_calls(), 0);
    }

    #[tokio::test]
    async fn provider_failure_keeps_user_turn_and_clears_busy() {
        let provider = Arc::new(ScriptedProvider::failing());
        let (store, dispatcher) = dispatcher_with(provider);
        let session_id = store.create_session();

        let result = dispatcher
            .send_user_message(session_id, "hello", GenerationMode::Text)
            .await;

        let error = result.expect_err("provider failure surfaces");
        assert!(matches!(error, SessionError::Provider { .. }));
        assert!(matches!(
            error.provider_error(),
            Some(ProviderError::Status { status: 503, .. })
        ));

        let messages = store.messages(session_id).expect("session exists");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text_content(), Some("hello"));
        assert_eq!(store.is_busy(session_id).ok(), Some(false));
    }

    #[tokio::test]
    async fn image_failure_keeps_user_turn_and_clears_busy() {
        let provider = Arc::new(ScriptedProvider::failing());
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let session_id = store.create_session();

        let error = dispatcher
            .send_user_message(session_id, "a lighthouse at dusk", GenerationMode::Image)
            .await
            .expect_err("provider failure surfaces");
        assert!(matches!(
            error.provider_error(),
            Some(ProviderError::Status { status: 503, .. })
        ));

        let request = provider.last_image_request().expect("provider was called");
        assert_eq!(request.prompt, "a lighthouse at dusk");
        assert_eq!(provider.text_calls(), 0);

        let messages = store.messages(session_id).expect("session exists");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].sender(), Sender::User);
        assert_eq!(messages[1].text_content(), Some("a lighthouse at dusk"));
        assert_eq!(store.is_busy(session_id).ok(), Some(false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_while_busy_is_rejected() {
        let provider = Arc::new(GatedProvider::new("late reply"));
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let dispatcher = Arc::new(dispatcher);
        let session_id = store.create_session();

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .send_user_message(session_id, "first", GenerationMode::Text)
                    .await
            }
        });

        provider.wait_started().await;
        assert_eq!(store.is_busy(session_id).ok(), Some(true));
        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(2));

        let second = dispatcher
            .send_user_message(session_id, "second", GenerationMode::Text)
            .await;
        assert!(matches!(second, Err(SessionError::SessionBusy { .. })));
        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(2));

        provider.release();
        let first = first.await.expect("task completes").expect("send succeeds");
        assert!(matches!(first, SendOutcome::Delivered(_)));
        assert_eq!(store.is_busy(session_id).ok(), Some(false));
        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(3));
    }

    #[tokio::test]
    async fn simultaneous_sends_to_one_session_admit_exactly_one() {
        let provider = Arc::new(GatedProvider::new("reply"));
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let session_id = store.create_session();

        let (left, right, ()) = tokio::join!(
            dispatcher.send_user_message(session_id, "left", GenerationMode::Text),
            dispatcher.send_user_message(session_id, "right", GenerationMode::Text),
            async {
                provider.wait_started().await;
                provider.release();
            }
        );

        let outcomes = [left, right];
        let delivered = outcomes.iter().filter(|result| result.is_ok()).count();
        let busy = outcomes
            .iter()
            .filter(|result| matches!(result, Err(SessionError::SessionBusy { .. })))
            .count();
        assert_eq!((delivered, busy), (1, 1));
        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sends_to_distinct_sessions_run_independently() {
        let provider = Arc::new(
            ScriptedProvider::replying("pong").with_delay(Duration::from_millis(20)),
        );
        let (store, dispatcher) = dispatcher_with(provider);
        let first = store.create_session();
        let second = store.create_session();

        let (left, right) = tokio::join!(
            dispatcher.send_user_message(first, "ping A", GenerationMode::Text),
            dispatcher.send_user_message(second, "ping B", GenerationMode::Text),
        );
        assert!(left.is_ok());
        assert!(right.is_ok());

        for (session_id, prompt) in [(first, "ping A"), (second, "ping B")] {
            let messages = store.messages(session_id).expect("session exists");
            assert_eq!(messages.len(), 3);
            assert_eq!(messages[1].text_content(), Some(prompt));
            assert_eq!(messages[2].text_content(), Some("pong"));
            assert_eq!(store.is_busy(session_id).ok(), Some(false));
        }
    }

    #[tokio::test]
    async fn selecting_and_sending_only_touches_target_session() {
        let provider = Arc::new(ScriptedProvider::replying("sure"));
        let (store, dispatcher) = dispatcher_with(provider);

        let session_a = store.create_session();
        store
            .append_message(session_a, Message::user_text("earlier question"))
            .expect("session exists");
        let session_b = store.create_session();
        store.select_session(session_a).expect("exists");

        store.select_session(session_b).expect("exists");
        dispatcher
            .send_user_message(session_b, "hi", GenerationMode::Text)
            .await
            .expect("send succeeds");

        assert_eq!(store.current_session_id(), Some(session_b));
        assert_eq!(store.messages(session_b).map(|m| m.len()).ok(), Some(3));
        assert_eq!(store.messages(session_a).map(|m| m.len()).ok(), Some(2));
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let provider = Arc::new(ScriptedProvider::replying("unused"));
        let (_store, dispatcher) = dispatcher_with(provider.clone());
        let stranger = SessionStore::new().create_session();

        let result = dispatcher
            .send_user_message(stranger, "hello", GenerationMode::Text)
            .await;
        assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
        assert_eq!(provider.text_calls(), 0);
    }

    #[tokio::test]
    async fn removal_during_dispatch_drops_the_reply() {
        let provider = Arc::new(GatedProvider::new("too late"));
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let session_id = store.create_session();

        let (result, ()) = tokio::join!(
            dispatcher.send_user_message(session_id, "hello", GenerationMode::Text),
            async {
                provider.wait_started().await;
                store.remove_session(session_id).expect("removable");
                provider.release();
            }
        );

        assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_provider_error() {
        let provider = Arc::new(GatedProvider::new("never delivered"));
        let store = Arc::new(SessionStore::new());
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            provider,
            DispatchOptions::new("test-model").with_timeout(Duration::from_millis(10)),
        );
        let session_id = store.create_session();

        let error = dispatcher
            .send_user_message(session_id, "hello", GenerationMode::Text)
            .await
            .expect_err("gate is never released");
        assert!(matches!(
            error.provider_error(),
            Some(ProviderError::TimedOut { .. })
        ));
        assert_eq!(store.is_busy(session_id).ok(), Some(false));
        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(2));
    }

    #[tokio::test]
    async fn dropping_the_send_future_releases_busy() {
        let provider = Arc::new(GatedProvider::new("abandoned"));
        let (store, dispatcher) = dispatcher_with(provider.clone());
        let session_id = store.create_session();

        {
            let send = dispatcher.send_user_message(session_id, "hello", GenerationMode::Text);
            tokio::pin!(send);
            tokio::select! {
                _ = &mut send => panic!("gate was never released"),
                () = provider.wait_started() => {}
            }
            assert_eq!(store.is_busy(session_id).ok(), Some(true));
        }

        assert_eq!(store.is_busy(session_id).ok(), Some(false));
        assert_eq!(store.messages(session_id).map(|m| m.len()).ok(), Some(2));
    }

    #[test]
    fn set_model_only_changes_the_model() {
        let provider = Arc::new(ScriptedProvider::replying("unused"));
        let store = Arc::new(SessionStore::new());
        let dispatcher = MessageDispatcher::new(
            store,
            provider,
            DispatchOptions::new("a").with_image_size(ImageSize::Large),
        );

        dispatcher.set_model("b");
        let options = dispatcher.options();
        assert_eq!(options.model_id, "b");
        assert_eq!(options.image_size, ImageSize::Large);
    }

    #[test]
    fn history_skips_image_turns() {
        let history = build_text_history(&[
            Message::bot_text("greeting"),
            Message::user_text("draw a cat"),
            Message::bot_image("https://img.example/cat.png"),
            Message::user_text("now describe it"),
        ]);

        assert_eq!(
            history,
            vec![
                ProviderMessage::assistant("greeting"),
                ProviderMessage::user("draw a cat"),
                ProviderMessage::user("now describe it"),
            ]
        );
    }
}

use std::sync::Arc;

use parley_llm::{GenerationProvider, ProviderError, create_provider};
use parley_session::{GenerationMode, MessageDispatcher, SendOutcome, SessionId, SessionStore};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

use crate::command::{Command, HELP_TEXT, parse_command};
use crate::render::{format_model_list, format_session_list, spawn_renderer};
use crate::settings::SettingsStore;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to create provider `{provider_id}` on `{stage}`: {source}"))]
    CreateProvider {
        stage: &'static str,
        provider_id: String,
        source: ProviderError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Line-oriented chat front end over one store and one dispatcher.
pub struct ChatApp {
    settings: SettingsStore,
    store: Arc<SessionStore>,
    dispatcher: Arc<MessageDispatcher>,
    mode: GenerationMode,
    pending: JoinSet<()>,
}

impl ChatApp {
    pub fn new(settings: SettingsStore) -> Result<Self, AppError> {
        let current = settings.settings();
        let provider =
            create_provider(current.to_provider_config()).context(CreateProviderSnafu {
                stage: "create-provider",
                provider_id: current.provider_id.clone(),
            })?;
        Ok(Self::with_provider(settings, provider))
    }

    /// Builds the app around an already constructed provider.
    pub fn with_provider(settings: SettingsStore, provider: Arc<dyn GenerationProvider>) -> Self {
        let current = settings.settings();
        tracing::info!(
            provider_id = %provider.id(),
            model = %current.model,
            "provider ready"
        );

        let store = Arc::new(SessionStore::new());
        let dispatcher = Arc::new(MessageDispatcher::new(
            Arc::clone(&store),
            provider,
            current.dispatch_options(),
        ));

        Self {
            settings,
            store,
            dispatcher,
            mode: GenerationMode::Text,
            pending: JoinSet::new(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub async fn run(mut self) -> Result<(), AppError> {
        let renderer = spawn_renderer(Arc::clone(&self.store));
        self.store.create_session();
        println!("type /help for commands");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "read-stdin-line",
        })? {
            let flow = match parse_command(&line) {
                Ok(command) => self.handle(command),
                Err(error) => {
                    println!("{error}");
                    Flow::Continue
                }
            };
            while self.pending.try_join_next().is_some() {}
            if flow == Flow::Quit {
                break;
            }
        }

        self.drain_pending().await;
        renderer.finish().await;
        Ok(())
    }

    /// Waits for in-flight sends so their replies are shown before exit.
    async fn drain_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        println!("waiting for {} pending send(s)...", self.pending.len());
        while let Some(joined) = self.pending.join_next().await {
            if let Err(error) = joined {
                tracing::warn!(error = %error, "send task failed");
            }
        }
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Empty => {}
            Command::Send(text) => self.spawn_send(text, self.mode),
            Command::Image(prompt) => self.spawn_send(prompt, GenerationMode::Image),
            Command::NewSession => {
                self.store.create_session();
            }
            Command::List => println!(
                "{}",
                format_session_list(&self.store.list_sessions(), self.store.current_session_id())
            ),
            Command::Switch(position) => match self.session_at(position) {
                Some(session_id) => {
                    if let Err(error) = self.store.select_session(session_id) {
                        println!("{error}");
                    }
                }
                None => println!("no chat number {position}, see /list"),
            },
            Command::Delete(position) => match self.session_at(position) {
                Some(session_id) => self.delete_session(session_id),
                None => println!("no chat number {position}, see /list"),
            },
            Command::Mode(mode) => {
                if mode == GenerationMode::Image && !self.dispatcher.provider().supports_images() {
                    println!(
                        "{} cannot generate images",
                        self.dispatcher.provider().name()
                    );
                } else {
                    self.mode = mode;
                    println!("mode: {}", mode_label(mode));
                }
            }
            Command::Model(None) => println!("model: {}", self.dispatcher.options().model_id),
            Command::Model(Some(model_id)) => self.switch_model(model_id),
            Command::Models => println!(
                "{}",
                format_model_list(
                    self.dispatcher.provider().fallback_models(),
                    &self.dispatcher.options().model_id
                )
            ),
            Command::Help => println!("{HELP_TEXT}"),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn session_at(&self, position: usize) -> Option<SessionId> {
        self.store
            .list_sessions()
            .get(position.checked_sub(1)?)
            .map(|session| session.id)
    }

    fn delete_session(&self, session_id: SessionId) {
        if let Err(error) = self.store.remove_session(session_id) {
            println!("{error}");
            return;
        }
        if self.store.is_empty() {
            self.store.create_session();
        }
    }

    fn switch_model(&self, model_id: String) {
        self.dispatcher.set_model(model_id.clone());

        if let Err(error) = self
            .settings
            .update(|settings| settings.model = model_id.clone())
        {
            tracing::warn!(error = %error, "failed to persist model selection");
            println!("model changed for this run only: {error}");
            return;
        }
        println!("model: {}", self.dispatcher.options().model_id);
    }

    /// Sends on a background task so other chats stay usable meanwhile.
    fn spawn_send(&mut self, text: String, mode: GenerationMode) {
        let session_id = match self.store.current_session_id() {
            Some(session_id) => session_id,
            None => self.store.create_session(),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        self.pending.spawn(async move {
            match dispatcher.send_user_message(session_id, &text, mode).await {
                Ok(SendOutcome::Delivered(_)) | Ok(SendOutcome::EmptyInput) => {}
                Err(error) => println!("error: {error}"),
            }
        });
    }
}

fn mode_label(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::Text => "text",
        GenerationMode::Image => "image",
    }
}

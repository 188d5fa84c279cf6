use serde::{Deserialize, Serialize};
use snafu::ensure;

use super::http::post_json;
use super::model::{DEFAULT_OLLAMA_ENDPOINT, DEFAULT_OLLAMA_MODEL, Model, default_ollama_models};
use super::provider::{
    BoxFuture, EmptyCompletionSnafu, EmptyMessageSetSnafu, GenerationProvider, ImageRef,
    ImageRequest, ProviderConfig, ProviderResult, Role, TextRequest, UnsupportedCapabilitySnafu,
};

pub const OLLAMA_PROVIDER_ID: &str = "ollama";

/// Local Ollama server speaking the native `/api/chat` protocol.
pub struct OllamaAdapter {
    config: ProviderConfig,
    default_model: String,
    fallback_models: Vec<Model>,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Debug, Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: String,
}

impl OllamaAdapter {
    pub fn new(mut config: ProviderConfig) -> Self {
        if config.base_url.is_empty() {
            config.base_url = DEFAULT_OLLAMA_ENDPOINT.to_string();
        }
        let default_model = config
            .default_model
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());

        Self {
            config,
            default_model,
            fallback_models: default_ollama_models(),
            http: reqwest::Client::new(),
        }
    }

    fn chat_body(request: &TextRequest) -> ChatBody<'_> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            messages.push(ChatTurn {
                role: "system",
                content: preamble,
            });
        }
        messages.extend(request.messages.iter().map(|message| ChatTurn {
            role: match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &message.content,
        }));

        let options = (request.temperature.is_some() || request.max_tokens.is_some()).then(|| {
            ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            }
        });

        ChatBody {
            model: &request.model_id,
            messages,
            stream: false,
            options,
        }
    }

    async fn chat(&self, request: TextRequest) -> ProviderResult<String> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "ollama-chat",
                model_id: request.model_id.clone(),
            }
        );

        let url = format!("{}/api/chat", self.config.base_url);
        let body = Self::chat_body(&request);
        let reply: ChatReply = post_json(
            &self.http,
            &url,
            Some(self.config.api_key.as_str()),
            &body,
            "ollama-chat",
        )
        .await?;

        ensure!(
            !reply.message.content.trim().is_empty(),
            EmptyCompletionSnafu {
                stage: "ollama-chat-reply",
                model_id: request.model_id.clone(),
            }
        );

        Ok(reply.message.content)
    }
}

impl GenerationProvider for OllamaAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn fallback_models(&self) -> &[Model] {
        &self.fallback_models
    }

    fn supports_images(&self) -> bool {
        false
    }

    fn generate_text<'a>(&'a self, request: TextRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let model_id = request.model_id.clone();
            let result = self.chat(request).await;
            if let Err(error) = &result {
                tracing::warn!(
                    provider_id = %self.id(),
                    model_id = %model_id,
                    base_url = %self.config.base_url,
                    error = %error,
                    "ollama chat failed"
                );
            }
            result
        })
    }

    fn generate_image<'a>(
        &'a self,
        _request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<ImageRef>> {
        Box::pin(async move {
            UnsupportedCapabilitySnafu {
                stage: "ollama-generate-image",
                provider_id: self.config.provider_id.clone(),
                capability: "generate images",
            }
            .fail()
        })
    }
}

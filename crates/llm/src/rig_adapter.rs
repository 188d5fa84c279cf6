use rig::OneOrMany;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::message::AssistantContent;
use rig::prelude::CompletionClient;
use rig::providers::openai;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, ensure};

use super::http::post_json;
use super::model::{
    DEFAULT_OPENAI_ENDPOINT, DEFAULT_OPENAI_IMAGE_MODEL, DEFAULT_OPENAI_MODEL, ImageSize, Model,
    default_openai_models,
};
use super::provider::{
    BoxFuture, CompletionsFailedSnafu, EmptyCompletionSnafu, EmptyMessageSetSnafu,
    GenerationProvider, HttpClientSnafu, ImageRef, ImageRequest, MissingApiKeySnafu,
    MissingImageUrlSnafu, ProviderConfig, ProviderMessage, ProviderResult, Role, TextRequest,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

/// OpenAI backend: chat completions go through rig, image generation through
/// the plain `/images/generations` endpoint so the provider-hosted URL is kept.
pub struct RigProviderAdapter {
    config: ProviderConfig,
    default_model: String,
    fallback_models: Vec<Model>,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ImageGenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: ImageSize,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
}

impl RigProviderAdapter {
    pub fn new(mut config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        if config.base_url.is_empty() {
            config.base_url = DEFAULT_OPENAI_ENDPOINT.to_string();
        }
        let default_model = config
            .default_model
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());

        Ok(Self {
            config,
            default_model,
            fallback_models: default_openai_models(),
            http: reqwest::Client::new(),
        })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        openai::Client::builder()
            .api_key(config.api_key.as_str())
            .base_url(config.base_url.as_str())
            .build()
            .context(HttpClientSnafu {
                stage: "build-client",
            })
    }

    fn to_rig_message(message: &ProviderMessage) -> RigMessage {
        match message.role {
            Role::User => RigMessage::user(message.content.clone()),
            Role::Assistant => RigMessage::assistant(message.content.clone()),
        }
    }

    fn collect_text(choice: &OneOrMany<AssistantContent>) -> String {
        choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    async fn complete(&self, request: TextRequest) -> ProviderResult<String> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "rig-complete",
                model_id: request.model_id.clone(),
            }
        );

        let client = Self::build_client(&self.config)?;
        let model = client.completion_model(request.model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .map(Self::to_rig_message)
            .collect::<Vec<_>>();
        let Some(prompt) = messages.pop() else {
            return EmptyMessageSetSnafu {
                stage: "rig-complete-pop-prompt",
                model_id: request.model_id,
            }
            .fail();
        };

        // Rig takes the newest turn as the prompt and the rest as chat history.
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            builder = builder.preamble(preamble.clone());
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        let response = builder.send().await.context(CompletionsFailedSnafu {
            stage: "rig-complete-send",
        })?;

        let text = Self::collect_text(&response.choice);
        ensure!(
            !text.trim().is_empty(),
            EmptyCompletionSnafu {
                stage: "rig-complete-collect",
                model_id: request.model_id,
            }
        );

        Ok(text)
    }

    async fn create_image(&self, request: ImageRequest) -> ProviderResult<ImageRef> {
        let url = format!("{}/images/generations", self.config.base_url);
        let body = ImageGenerationBody {
            model: DEFAULT_OPENAI_IMAGE_MODEL,
            prompt: &request.prompt,
            n: request.count,
            size: request.size,
            response_format: "url",
        };

        let response: ImageGenerationResponse = post_json(
            &self.http,
            &url,
            Some(self.config.api_key.as_str()),
            &body,
            "openai-image-generation",
        )
        .await?;

        first_image_url(response)
    }
}

fn first_image_url(response: ImageGenerationResponse) -> ProviderResult<ImageRef> {
    response
        .data
        .into_iter()
        .find_map(|datum| datum.url.filter(|url| !url.trim().is_empty()))
        .map(ImageRef::new)
        .context(MissingImageUrlSnafu {
            stage: "openai-image-first-url",
        })
}

impl GenerationProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn fallback_models(&self) -> &[Model] {
        &self.fallback_models
    }

    fn supports_images(&self) -> bool {
        true
    }

    fn generate_text<'a>(&'a self, request: TextRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let model_id = request.model_id.clone();
            let message_count = request.messages.len();
            let result = self.complete(request).await;
            if let Err(error) = &result {
                tracing::warn!(
                    provider_id = %self.id(),
                    model_id = %model_id,
                    message_count,
                    error = %error,
                    "text generation failed"
                );
            }
            result
        })
    }

    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<ImageRef>> {
        Box::pin(async move {
            let size = request.size;
            let result = self.create_image(request).await;
            if let Err(error) = &result {
                tracing::warn!(
                    provider_id = %self.id(),
                    size = %size,
                    error = %error,
                    "image generation failed"
                );
            }
            result
        })
    }
}

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use super::model::{ImageSize, Model};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub base_url: String,
    pub default_model: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            default_model: default_model
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty()),
        }
    }
}

/// Speaker role understood by generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl TextRequest {
    pub fn new(model_id: impl Into<String>, messages: Vec<ProviderMessage>) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            preamble: None,
            temperature: None,
            max_tokens: None,
        }
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
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub count: u8,
    pub size: ImageSize,
}

impl ImageRequest {
    /// Creates a single-image request.
    pub fn new(prompt: impl Into<String>, size: ImageSize) -> Self {
        Self {
            prompt: prompt.into(),
            count: 1,
            size,
        }
    }
}

/// Handle to a generated image, usually a URL served by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' cannot {capability}"))]
    UnsupportedCapability {
        stage: &'static str,
        provider_id: String,
        capability: &'static str,
    },
    #[snafu(display("text request for model '{model_id}' has no messages"))]
    EmptyMessageSet {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("request to '{url}' failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("provider endpoint '{url}' returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("provider returned no text for model '{model_id}'"))]
    EmptyCompletion {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("provider response did not include an image url"))]
    MissingImageUrl { stage: &'static str },
    #[snafu(display("provider did not answer within {after:?}"))]
    TimedOut {
        stage: &'static str,
        after: Duration,
    },
}

/// Capability contract for a text/image generation backend.
///
/// Implementations are held as `Arc<dyn GenerationProvider>`, so async methods
/// return boxed futures instead of relying on `async fn` in traits.
pub trait GenerationProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn fallback_models(&self) -> &[Model];
    fn supports_images(&self) -> bool;
    fn generate_text<'a>(&'a self, request: TextRequest) -> BoxFuture<'a, ProviderResult<String>>;
    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<ImageRef>>;
}

use std::sync::Arc;

mod http;
mod model;
mod ollama;
mod provider;
mod rig_adapter;

pub use model::{
    DEFAULT_OLLAMA_ENDPOINT, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_ENDPOINT,
    DEFAULT_OPENAI_IMAGE_MODEL, DEFAULT_OPENAI_MODEL, ImageSize, Model, default_ollama_models,
    default_openai_models,
};
pub use ollama::{OLLAMA_PROVIDER_ID, OllamaAdapter};
pub use provider::{
    BoxFuture, GenerationProvider, ImageRef, ImageRequest, ProviderConfig, ProviderError,
    ProviderMessage, ProviderResult, Role, TextRequest,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};

pub fn create_provider(
    mut config: ProviderConfig,
) -> ProviderResult<Arc<dyn GenerationProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        OLLAMA_PROVIDER_ID => Ok(Arc::new(OllamaAdapter::new(config))),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

/// Default endpoint for a provider id, or `None` for unknown providers.
pub fn default_endpoint_for(provider_id: &str) -> Option<&'static str> {
    match provider_id {
        "openai" | "rig-openai" | "" => Some(DEFAULT_OPENAI_ENDPOINT),
        OLLAMA_PROVIDER_ID => Some(DEFAULT_OLLAMA_ENDPOINT),
        _ => None,
    }
}

/// Default chat model for a provider id, or `None` for unknown providers.
pub fn default_model_for(provider_id: &str) -> Option<&'static str> {
    match provider_id {
        "openai" | "rig-openai" | "" => Some(DEFAULT_OPENAI_MODEL),
        OLLAMA_PROVIDER_ID => Some(DEFAULT_OLLAMA_MODEL),
        _ => None,
    }
}

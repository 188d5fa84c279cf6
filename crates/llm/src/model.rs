use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_IMAGE_MODEL: &str = "dall-e-2";

pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Output dimensions accepted by image generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "256x256")]
    Small,
    #[serde(rename = "512x512")]
    Medium,
    #[serde(rename = "1024x1024")]
    Large,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "256x256",
            Self::Medium => "512x512",
            Self::Large => "1024x1024",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

pub fn default_openai_models() -> Vec<Model> {
    vec![
        Model::from_id("gpt-4o-mini").with_description("Balanced cost/performance default"),
        Model::from_id("gpt-4o").with_description("High quality general model"),
        Model::from_id("gpt-4.1").with_description("Reasoning-forward GPT-4.1"),
        Model::from_id("o3").with_description("Advanced reasoning model"),
    ]
}

pub fn default_ollama_models() -> Vec<Model> {
    vec![
        Model::new("llama3.2", "Llama 3.2").with_description("Small local default"),
        Model::new("llama3.1", "Llama 3.1"),
        Model::new("mistral", "Mistral 7B"),
        Model::new("qwen2.5", "Qwen 2.5"),
    ]
}

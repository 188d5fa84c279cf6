use std::path::PathBuf;

use clap::Parser;

use crate::settings::CliOverrides;

/// Parley - a terminal chat client for OpenAI-compatible and Ollama backends
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the settings file (defaults to <config_dir>/parley/settings.json)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Provider id: openai or ollama
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Provider endpoint (overrides the settings file)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Model id used for text generation
    #[arg(short, long)]
    pub model: Option<String>,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            provider_id: self.provider.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
        }
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_llm::{
    DEFAULT_OPENAI_MODEL, ImageSize, ProviderConfig, RIG_OPENAI_PROVIDER_ID, default_endpoint_for,
    default_model_for,
};
use parley_session::DispatchOptions;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = RIG_OPENAI_PROVIDER_ID;
pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PARLEY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub image_size: ImageSize,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: String::new(),
            model: String::new(),
            image_size: ImageSize::default(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            request_timeout_secs: None,
        }
    }
}

impl AppSettings {
    /// Trims every field and fills provider-specific endpoint/model defaults.
    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_ascii_lowercase()
        };
        self.api_key = self.api_key.trim().to_string();

        self.endpoint = self.endpoint.trim().trim_end_matches('/').to_string();
        if self.endpoint.is_empty() {
            self.endpoint = default_endpoint_for(&self.provider_id)
                .unwrap_or_default()
                .to_string();
        }

        self.model = self.model.trim().to_string();
        if self.model.is_empty() {
            self.model = default_model_for(&self.provider_id)
                .unwrap_or(DEFAULT_OPENAI_MODEL)
                .to_string();
        }

        self.system_prompt = self
            .system_prompt
            .map(|prompt| prompt.trim().to_string())
            .filter(|prompt| !prompt.is_empty());
        self.temperature = self
            .temperature
            .filter(|temperature| temperature.is_finite() && *temperature >= 0.0);
        self.max_tokens = self.max_tokens.filter(|tokens| *tokens > 0);
        self.request_timeout_secs = self.request_timeout_secs.filter(|secs| *secs > 0);

        self
    }

    /// Settings-file form: endpoint and model equal to the provider default
    /// are stored blank so they keep following the provider.
    fn for_file(mut self) -> Self {
        let provider_id = self.provider_id.trim().to_ascii_lowercase();

        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if default_endpoint_for(&provider_id) == Some(endpoint) {
            self.endpoint.clear();
        }

        if default_model_for(&provider_id) == Some(self.model.trim()) {
            self.model.clear();
        }

        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            Some(self.model.clone()),
        )
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        let mut options = DispatchOptions::new(&self.model).with_image_size(self.image_size);
        if let Some(prompt) = &self.system_prompt {
            options = options.with_preamble(prompt);
        }
        if let Some(temperature) = self.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        if let Some(timeout) = self.request_timeout() {
            options = options.with_timeout(timeout);
        }
        options
    }
}

/// Command-line values layered on top of file and environment settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

pub struct SettingsStore {
    // File, environment and command line merged, then normalized.
    settings: ArcSwap<AppSettings>,
    // Only what the settings file holds. `update` edits and persists this layer.
    file_settings: ArcSwap<AppSettings>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf, overrides: &CliOverrides) -> Self {
        Self::with_env_prefix(config_path, ENV_PREFIX, overrides)
    }

    fn with_env_prefix(config_path: PathBuf, env_prefix: &str, overrides: &CliOverrides) -> Self {
        let file_settings = Self::load_file_layer(&config_path);
        let settings = Self::load_effective(&file_settings, env_prefix, overrides);
        Self {
            settings: ArcSwap::from_pointee(settings),
            file_settings: ArcSwap::from_pointee(file_settings),
            config_path,
        }
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    /// Applies `edit` to the settings file and to the running settings.
    ///
    /// Environment and command-line values are never written back; only the
    /// fields `edit` touches change on disk.
    pub fn update(&self, edit: impl Fn(&mut AppSettings)) -> Result<(), SettingsError> {
        let mut file_settings = (*self.file_settings.load_full()).clone();
        edit(&mut file_settings);
        self.persist(&file_settings.clone().for_file())?;

        let mut settings = (*self.settings.load_full()).clone();
        edit(&mut settings);
        self.settings.store(Arc::new(settings.normalized()));
        self.file_settings.store(Arc::new(file_settings));
        Ok(())
    }

    fn load_file_layer(path: &Path) -> AppSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return AppSettings::default();
        }

        Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .extract::<AppSettings>()
            .unwrap_or_else(|error| {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AppSettings::default()
            })
    }

    // Settings file < environment < command line.
    fn load_effective(
        file_settings: &AppSettings,
        env_prefix: &str,
        overrides: &CliOverrides,
    ) -> AppSettings {
        Figment::from(Serialized::defaults(file_settings))
            .merge(Env::prefixed(env_prefix))
            .merge(Serialized::defaults(overrides))
            .extract::<AppSettings>()
            .unwrap_or_else(|error| {
                tracing::warn!("ignoring unreadable environment settings: {}", error);
                file_settings.clone()
            })
            .normalized()
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

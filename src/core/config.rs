//! Settings management for quillmind
//!
//! Per-provider configuration plus the persisted engine choices, stored as TOML.
//! Every mutation goes through [`SettingsStore::update`], which writes the file.
//!
//! Settings file location: ~/.config/quillmind/settings.toml

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{QuillError, Result};
use crate::core::types::ProviderKind;

/// Everything quillmind persists between launches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Engine the user last chose (restored and validated on launch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_engine: Option<ProviderKind>,
    /// Per-engine model preference
    #[serde(default)]
    pub selected_models: SelectedModels,
    /// Ollama server configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Cloud API configuration
    #[serde(default)]
    pub cloud: CloudConfig,
    /// Embedded engine configuration
    #[serde(default)]
    pub embedded: EmbeddedConfig,
    /// Chat session behaviour
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Model last selected for each engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedModels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
}

impl SelectedModels {
    pub fn get(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Ollama => self.ollama.as_deref(),
            ProviderKind::Embedded => self.embedded.as_deref(),
            ProviderKind::Cloud => self.cloud.as_deref(),
        }
    }

    pub fn set(&mut self, kind: ProviderKind, model: impl Into<String>) {
        let model = Some(model.into());
        match kind {
            ProviderKind::Ollama => self.ollama = model,
            ProviderKind::Embedded => self.embedded = model,
            ProviderKind::Cloud => self.cloud = model,
        }
    }
}

/// Ollama server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Host address (default: localhost)
    pub host: String,
    /// Port number (default: 11434)
    pub port: u16,
    /// How long the startup probe waits for `/api/tags`
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Request timeout for chat calls, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// OpenAI-compatible service the cloud config points at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    #[default]
    OpenAI,
    OpenRouter,
    Groq,
    DeepSeek,
    Custom,
}

impl CloudProvider {
    /// Base URL used when the config leaves `base_url` empty
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            CloudProvider::OpenAI => Some("https://api.openai.com/v1"),
            CloudProvider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            CloudProvider::Groq => Some("https://api.groq.com/openai/v1"),
            CloudProvider::DeepSeek => Some("https://api.deepseek.com/v1"),
            CloudProvider::Custom => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            CloudProvider::OpenAI => "gpt-4o-mini",
            CloudProvider::OpenRouter => "openai/gpt-4o-mini",
            CloudProvider::Groq => "llama-3.1-8b-instant",
            CloudProvider::DeepSeek => "deepseek-chat",
            CloudProvider::Custom => "default",
        }
    }
}

impl std::str::FromStr for CloudProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(CloudProvider::OpenAI),
            "openrouter" => Ok(CloudProvider::OpenRouter),
            "groq" => Ok(CloudProvider::Groq),
            "deepseek" => Ok(CloudProvider::DeepSeek),
            "custom" => Ok(CloudProvider::Custom),
            other => Err(format!("Unknown cloud provider '{}'", other)),
        }
    }
}

/// Cloud (OpenAI-compatible) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub api_key: String,
    /// Empty means "use the provider preset"
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub provider: CloudProvider,
}

impl CloudConfig {
    /// Whether there is enough configured to attempt a request
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && self.resolved_base_url().is_some()
    }

    /// Base URL with the preset applied and trailing slashes removed
    pub fn resolved_base_url(&self) -> Option<String> {
        let base = if self.base_url.trim().is_empty() {
            self.provider.default_base_url()?.to_string()
        } else {
            self.base_url.trim().to_string()
        };
        Some(base.trim_end_matches('/').to_string())
    }

    /// Model name with the preset default applied
    pub fn resolved_model(&self) -> String {
        if self.model_name.trim().is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.model_name.trim().to_string()
        }
    }
}

/// Embedded engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedConfig {
    /// Model identifier; resolved to `<model_dir>/<model_id>.gguf`
    pub model_id: String,
    /// Overrides the default model cache directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
    /// Set once the first model load has completed
    #[serde(default)]
    pub first_run_done: bool,
}

/// Chat session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Number of recent messages sent to the provider
    pub context_window: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            active_engine: None,
            selected_models: SelectedModels::default(),
            ollama: OllamaConfig::default(),
            cloud: CloudConfig::default(),
            embedded: EmbeddedConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            probe_timeout_ms: default_probe_timeout_ms(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model_name: String::new(),
            provider: CloudProvider::default(),
        }
    }
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            model_id: "qwen2.5-0.5b-instruct-q4_k_m".to_string(),
            model_dir: None,
            first_run_done: false,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_window: 20,
            system_prompt: None,
        }
    }
}

impl Settings {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quillmind")
    }

    /// Get the settings file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("settings.toml")
    }

    /// Get the full Ollama API URL
    pub fn ollama_url(&self) -> String {
        let host = self.ollama.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            // OLLAMA_HOST is commonly given as a full URL
            match url::Url::parse(host) {
                Ok(parsed) if parsed.port().is_some() => host.to_string(),
                _ => format!("{}:{}", host, self.ollama.port),
            }
        } else {
            format!("http://{}:{}", host, self.ollama.port)
        }
    }

    /// Directory holding embedded model files
    pub fn model_dir(&self) -> PathBuf {
        self.embedded.model_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quillmind")
                .join("models")
        })
    }

    /// Load settings from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| QuillError::config(format!("Failed to read settings: {}", e)))?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to a TOML file, creating the parent directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    QuillError::config(format!("Failed to create settings dir: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| QuillError::config(format!("Failed to write settings: {}", e)))?;
        Ok(())
    }

    /// Generate default settings content for display
    pub fn default_settings_toml() -> String {
        toml::to_string_pretty(&Settings::default())
            .unwrap_or_else(|_| String::from("# Error generating settings"))
    }
}

/// Values that win over the settings file for this process only
///
/// Built from the environment and the command line. Never written back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
    pub ollama_host: Option<String>,
    pub ollama_port: Option<u16>,
    pub cloud_api_key: Option<String>,
    pub cloud_base_url: Option<String>,
    pub model_dir: Option<PathBuf>,
}

impl SettingsOverrides {
    /// Read `OLLAMA_HOST`, `OLLAMA_PORT`, `QUILLMIND_CLOUD_API_KEY`,
    /// `QUILLMIND_CLOUD_BASE_URL` and `QUILLMIND_MODEL_DIR`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            ollama_host: non_empty("OLLAMA_HOST"),
            ollama_port: non_empty("OLLAMA_PORT").and_then(|p| p.trim().parse().ok()),
            cloud_api_key: non_empty("QUILLMIND_CLOUD_API_KEY"),
            cloud_base_url: non_empty("QUILLMIND_CLOUD_BASE_URL"),
            model_dir: non_empty("QUILLMIND_MODEL_DIR").map(PathBuf::from),
        }
    }

    /// Combine two sets; values in `other` take precedence
    pub fn merge(self, other: SettingsOverrides) -> Self {
        Self {
            ollama_host: other.ollama_host.or(self.ollama_host),
            ollama_port: other.ollama_port.or(self.ollama_port),
            cloud_api_key: other.cloud_api_key.or(self.cloud_api_key),
            cloud_base_url: other.cloud_base_url.or(self.cloud_base_url),
            model_dir: other.model_dir.or(self.model_dir),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&self, settings: &mut Settings) {
        if let Some(ref host) = self.ollama_host {
            settings.ollama.host = host.clone();
        }
        if let Some(port) = self.ollama_port {
            settings.ollama.port = port;
        }
        if let Some(ref key) = self.cloud_api_key {
            settings.cloud.api_key = key.clone();
        }
        if let Some(ref base_url) = self.cloud_base_url {
            settings.cloud.base_url = base_url.clone();
        }
        if let Some(ref dir) = self.model_dir {
            settings.embedded.model_dir = Some(dir.clone());
        }
    }
}

#[derive(Debug)]
struct StoreState {
    /// What the settings file holds
    stored: Settings,
    overrides: SettingsOverrides,
    /// `stored` with `overrides` applied; what callers see
    effective: Settings,
}

impl StoreState {
    fn new(stored: Settings) -> Self {
        Self {
            effective: stored.clone(),
            stored,
            overrides: SettingsOverrides::default(),
        }
    }

    fn refresh(&mut self) {
        let mut effective = self.stored.clone();
        self.overrides.apply(&mut effective);
        self.effective = effective;
    }
}

/// Key-value settings storage, written back on every change
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl SettingsStore {
    /// Load settings from the default location, falling back to defaults,
    /// with environment overrides applied on top
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();
        let store = Self::open(Settings::config_file());
        store.apply_overrides(SettingsOverrides::from_env());
        store
    }

    /// Open a store backed by `path`; a missing or unreadable file yields defaults
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = if path.exists() {
            match Settings::load_from(&path) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
                    Settings::default()
                }
            }
        } else {
            Settings::default()
        };

        Self {
            path: Some(path),
            state: RwLock::new(StoreState::new(settings)),
        }
    }

    /// A store that never touches the filesystem
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            state: RwLock::new(StoreState::new(settings)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the current settings, overrides included
    pub fn snapshot(&self) -> Settings {
        self.state.read().effective.clone()
    }

    /// Layer `overrides` over the settings for this process; nothing is written
    pub fn apply_overrides(&self, overrides: SettingsOverrides) {
        if overrides.is_empty() {
            return;
        }
        let mut state = self.state.write();
        state.overrides = std::mem::take(&mut state.overrides).merge(overrides);
        state.refresh();
        tracing::debug!("Settings overrides applied");
    }

    /// Mutate the stored settings and persist them immediately.
    /// Overridden fields keep their override value in [`snapshot`](Self::snapshot).
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        let stored = {
            let mut state = self.state.write();
            f(&mut state.stored);
            state.refresh();
            state.stored.clone()
        };

        if let Some(ref path) = self.path {
            stored.save_to(path)?;
            tracing::debug!(path = %path.display(), "Settings saved");
        }
        Ok(())
    }
}

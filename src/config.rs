//! Configuration types for the assistant orchestration layer.

use crate::error::{MuseError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MuseConfig {
    /// Primary (gateway/edge) streaming tier.
    pub gateway: GatewayConfig,
    /// Fallback (direct provider) streaming tier.
    pub provider: ProviderConfig,
    /// Chat request defaults.
    pub chat: ChatConfig,
    /// Simulated progress pacing.
    pub progress: ProgressConfig,
    /// Voice output settings.
    pub voice: VoiceConfig,
    /// Downstream image generation endpoint.
    pub generation: GenerationConfig,
}

/// Primary tier settings. The tier is unconfigured when `url` is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Full URL of the gateway chat-stream route.
    pub url: Option<String>,
    /// Bearer token sent with every gateway request.
    pub token: Option<String>,
}

impl GatewayConfig {
    /// The configured URL, if present and non-empty.
    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Fallback tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider API base URL.
    pub base_url: String,
    /// Model identifier used in the streaming path.
    pub model: String,
    /// API key, passed as the `key` query parameter.
    pub api_key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-1.5-flash".into(),
            api_key: String::new(),
        }
    }
}

/// Chat request defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Persona line placed at the top of the synthesized system instruction.
    pub persona: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            persona: "You are Muse, a friendly creative assistant for an AI content studio \
                      that makes images, action figures, Ghibli-style art, cartoons, memes, \
                      GIFs and short videos."
                .into(),
        }
    }
}

/// Tick intervals for the progress simulators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Milliseconds between image-generation phases.
    pub generation_interval_ms: u64,
    /// Milliseconds between reasoning narration phases.
    pub reasoning_interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            generation_interval_ms: 800,
            reasoning_interval_ms: 1200,
        }
    }
}

/// Voice output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Whether assistant replies are spoken.
    pub enabled: bool,
    /// TTS command (`espeak-ng`, `say`, ...).
    pub command: String,
    /// Voice name passed to the command (None = engine default).
    pub voice: Option<String>,
    /// Speaking rate in words per minute.
    pub rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_tts_command().into(),
            voice: None,
            rate: 175,
        }
    }
}

fn default_tts_command() -> &'static str {
    if cfg!(target_os = "macos") {
        "say"
    } else {
        "espeak-ng"
    }
}

/// Image generation endpoint used to resolve generation artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Endpoint URL accepting `{feature, prompt}` JSON.
    pub endpoint: Option<String>,
    /// Optional bearer token.
    pub api_key: Option<String>,
}

impl MuseConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| MuseError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MuseError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/muse/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("muse")
            .join("config.toml")
    }

    /// Overlay secrets and endpoints from the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("MUSE_GATEWAY_URL") {
            self.gateway.url = Some(url);
        }
        if let Some(token) = lookup("MUSE_GATEWAY_TOKEN") {
            self.gateway.token = Some(token);
        }
        if let Some(key) = lookup("MUSE_PROVIDER_API_KEY") {
            self.provider.api_key = key;
        }
        if let Some(endpoint) = lookup("MUSE_GENERATION_ENDPOINT") {
            self.generation.endpoint = Some(endpoint);
        }
        if let Some(key) = lookup("MUSE_GENERATION_API_KEY") {
            self.generation.api_key = Some(key);
        }
    }
}

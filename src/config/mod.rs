use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity: IdentityConfig,
    pub room: RoomConfig,
    pub detector: DetectorConfig,
    pub speech: SpeechConfig,
    pub server: ServerConfig,
}

/// Who this client authenticates as. A hosted deployment would get this from
/// an external auth provider; the local service reads it from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub meeting_id: String,
    /// Local caption retention cap. Remote history is unbounded.
    pub max_captions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Mean spectrum energy above which the client counts as speaking (0-255 scale).
    pub threshold: f32,
    /// Per-bin exponential smoothing time constant, 0.0..1.0.
    pub smoothing: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Transcription API endpoint. Empty disables captioning.
    pub api_endpoint: String,
    pub api_key: Option<String>,
    pub language: String,
    /// How much audio to accumulate before each transcription request.
    pub chunk_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            display_name: None,
            photo_url: None,
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            meeting_id: "main-meeting".to_string(),
            max_captions: 100,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            smoothing: 0.8,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            api_key: None,
            language: "en".to_string(),
            chunk_seconds: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 4483 }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

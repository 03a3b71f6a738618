//! TOML configuration file loading
//!
//! Supports `~/.config/colloquy/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Console API configuration
    #[serde(default)]
    pub console: ConsoleFileConfig,

    /// Audio configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Voice selection defaults
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Session behavior
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Console API configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConsoleFileConfig {
    /// Console base URL (e.g. `http://localhost:8080/api`)
    pub base_url: Option<String>,

    /// Bearer token for console requests
    pub api_key: Option<String>,

    /// Fixed socket URL, bypassing the signed-url endpoint
    pub socket_url: Option<String>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Enable microphone capture and playback
    pub enabled: Option<bool>,
}

/// Voice selection defaults
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Preferred voice id for the first connection
    pub voice_id: Option<String>,

    /// Conversation language override (e.g. "vi", "en", "auto")
    pub language: Option<String>,
}

/// Session behavior
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Agent phrases that end the conversation (replaces the defaults)
    pub end_phrases: Option<Vec<String>>,

    /// Maximum automatic reconnect attempts after an unexpected disconnect
    pub reconnect_attempts: Option<u32>,

    /// Base reconnect backoff in milliseconds (doubles per attempt)
    pub reconnect_base_ms: Option<u64>,

    /// Reconnect backoff ceiling in milliseconds
    pub reconnect_cap_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be
/// parsed.
#[must_use]
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };
    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
#[must_use]
pub fn load_config_file_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/colloquy/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("colloquy").join("config.toml"))
}

//! Configuration management for the colloquy client

pub mod file;

use crate::session::EndPhrases;

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Console API settings
    pub console: ConsoleConfig,

    /// Audio settings
    pub audio: AudioConfig,

    /// Preferred voice id for the first connection
    pub voice_id: Option<String>,

    /// Conversation language override; `None` follows the voice's trained
    /// language (or "auto")
    pub language: Option<String>,

    /// Agent phrases that end the conversation
    pub end_phrases: Vec<String>,

    /// Reconnection backoff tuning
    pub reconnect: ReconnectConfig,
}

/// Console API settings
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Console base URL
    pub base_url: String,

    /// Bearer token for console requests (from `COLLOQUY_API_KEY` env)
    pub api_key: Option<String>,

    /// Fixed socket URL, bypassing the signed-url endpoint
    pub socket_url: Option<String>,
}

/// Audio settings
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone capture and playback enabled
    pub enabled: bool,
}

/// Reconnection backoff tuning
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum automatic attempts after an unexpected disconnect
    pub max_attempts: u32,

    /// Base backoff in milliseconds, doubled per attempt
    pub base_ms: u64,

    /// Backoff ceiling in milliseconds
    pub cap_ms: u64,
}

/// Command-line overlays applied on top of the config file
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub console_url: Option<String>,
    pub api_key: Option<String>,
    pub socket_url: Option<String>,
    pub voice_id: Option<String>,
    pub language: Option<String>,
    pub disable_audio: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            console: ConsoleConfig {
                base_url: "http://localhost:8080/api".to_string(),
                api_key: None,
                socket_url: None,
            },
            audio: AudioConfig { enabled: true },
            voice_id: None,
            language: None,
            end_phrases: EndPhrases::default_phrases(),
            reconnect: ReconnectConfig {
                max_attempts: 5,
                base_ms: 1_000,
                cap_ms: 30_000,
            },
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the config file, then CLI/env
    /// overlays.
    #[must_use]
    pub fn load(overrides: &ConfigOverrides) -> Self {
        let file = file::load_config_file();
        Self::from_parts(&file, overrides)
    }

    fn from_parts(file: &file::ConfigFile, overrides: &ConfigOverrides) -> Self {
        let mut config = Self::default();

        if let Some(url) = &file.console.base_url {
            config.console.base_url.clone_from(url);
        }
        config.console.api_key = file.console.api_key.clone();
        config.console.socket_url = file.console.socket_url.clone();
        if let Some(enabled) = file.audio.enabled {
            config.audio.enabled = enabled;
        }
        config.voice_id = file.voice.voice_id.clone();
        config.language = file.voice.language.clone();
        if let Some(phrases) = &file.session.end_phrases {
            config.end_phrases.clone_from(phrases);
        }
        if let Some(attempts) = file.session.reconnect_attempts {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(base) = file.session.reconnect_base_ms {
            config.reconnect.base_ms = base;
        }
        if let Some(cap) = file.session.reconnect_cap_ms {
            config.reconnect.cap_ms = cap;
        }

        if let Some(url) = &overrides.console_url {
            config.console.base_url.clone_from(url);
        }
        if overrides.api_key.is_some() {
            config.console.api_key.clone_from(&overrides.api_key);
        }
        if overrides.socket_url.is_some() {
            config.console.socket_url.clone_from(&overrides.socket_url);
        }
        if overrides.voice_id.is_some() {
            config.voice_id.clone_from(&overrides.voice_id);
        }
        if overrides.language.is_some() {
            config.language.clone_from(&overrides.language);
        }
        if overrides.disable_audio {
            config.audio.enabled = false;
        }

        config
    }
}

//! Error types for the colloquy client

use thiserror::Error;

/// Result type alias for colloquy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the colloquy client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or capture error (includes microphone denial)
    #[error("audio error: {0}")]
    Audio(String),

    /// Socket-level transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire protocol error
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Console API error (signed URLs, voice catalog, previews)
    #[error("console error: {0}")]
    Console(String),

    /// A session is already active or connecting
    #[error("a session is already active")]
    SessionActive,

    /// No session is connected
    #[error("session is not connected")]
    NotConnected,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

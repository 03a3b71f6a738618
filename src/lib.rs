//! Colloquy - Real-time voice and text conversation client for AI agents
//!
//! This library streams microphone audio to a remote conversational agent
//! over a persistent WebSocket, plays the agent's synthesized speech as it
//! arrives, and exchanges text turns over the same channel.
//!
//! # Architecture
//!
//! ```text
//! microphone ──▶ FrameEncoder ──▶ SessionClient ──▶ socket
//!                (audio thread)     │       ▲
//!                                   ▼       │
//! speakers ◀── PlaybackQueue ◀── codec   SessionManager
//!                                          (lock, reconnect, lifecycle)
//! ```
//!
//! One [`SessionManager`] per process owns all lifecycle state. A session
//! exclusively owns one socket and one capture resource; both are released
//! together, capture first. Voice and language are connection-time-only:
//! changing them tears the session down and starts a new one.

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod providers;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use providers::{ConsoleClient, Language, SocketUrlProvider, StaticSocketUrl, VoiceProfile};
pub use session::{
    ConnectionState, EndPhrases, ReconnectPolicy, SessionConfig, SessionEvent, SessionLock,
    SessionManager, SessionOptions,
};

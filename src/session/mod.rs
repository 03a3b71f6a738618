//! Session lifecycle and protocol state machine
//!
//! One [`SessionManager`] per process owns all lifecycle state: the session
//! lock, the manual-end latch, the reconnection policy, and the single active
//! session client. Configuration is connection-time-only; voice or language
//! changes tear the session down completely and start a new one.

mod client;
mod manager;
mod reconnect;

pub use client::EndPhrases;
pub use manager::{SessionLock, SessionManager, SessionOptions};
pub use reconnect::ReconnectPolicy;

/// Lifecycle phase of the conversation session.
///
/// Reconfiguration is not a live state: it is a full teardown followed by a
/// fresh `Idle → Connecting` transition with the new configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session
    Idle,
    /// Socket opening; not yet usable
    Connecting,
    /// Initiation sent, capture and heartbeat running
    Connected,
    /// Closed by explicit user action or the natural-end heuristic
    Ended,
    /// Closed by a transport error or an unexpected remote close
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Ended => write!(f, "ended"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Connection-time session configuration, derived from the selected voice
/// profile and consumed exactly once at initiation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Voice identifier; `None` keeps the agent default
    pub voice_id: Option<String>,
    /// Conversation language code, or "auto"
    pub language: String,
    /// Display label of the active voice; non-default labels wrap outbound
    /// text as `<label>text</label>`
    pub voice_label: Option<String>,
}

/// Decoded inbound traffic and lifecycle notifications, surfaced to the
/// embedding application as a typed stream instead of callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Lifecycle phase change
    State(ConnectionState),
    /// Agent text turn (consecutive duplicates suppressed)
    AgentText(String),
    /// Informational notice from the remote endpoint
    SystemNotice(String),
    /// The natural-end heuristic matched an agent phrase; the session is
    /// being torn down as if the user hung up
    ConversationEnded,
    /// Automatic reconnection gave up after exhausting its attempts
    RetriesExhausted,
}

//! Wire protocol for the conversation socket
//!
//! Every message is a JSON object with a `type` discriminator. Outbound
//! messages are produced by the session client; inbound messages come from
//! the remote agent and are treated as untrusted, best-effort-parsed input.
//! Undecodable or unrecognized inbound traffic is dropped without touching
//! the connection.

use serde::{Deserialize, Serialize};

/// Connection-time configuration override, carried by the initiation message.
///
/// Applied once, immediately after the socket opens; changing voice or
/// language requires a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverride {
    /// Agent-level overrides
    pub agent: AgentOverride,
    /// Text-to-speech overrides
    pub tts: TtsOverride,
}

/// Agent-level connection overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOverride {
    /// Conversation language code, or "auto"
    pub language: String,
}

/// TTS connection overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsOverride {
    /// Voice identifier; `None` keeps the agent's default voice
    pub voice_id: Option<String>,
}

impl ConfigOverride {
    /// Build an override payload from a voice id and language code
    #[must_use]
    pub fn new(voice_id: Option<String>, language: impl Into<String>) -> Self {
        Self {
            agent: AgentOverride {
                language: language.into(),
            },
            tts: TtsOverride { voice_id },
        }
    }
}

/// Outgoing socket message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Session configuration, sent exactly once per connection immediately on open
    ConversationInitiationClientData {
        conversation_config_override: ConfigOverride,
    },
    /// A user text turn
    UserMessage { text: String },
    /// One base64-encoded PCM16 frame at 16 kHz
    UserAudioChunk { user_audio_chunk: String },
    /// Answer to a received ping, echoing its event id
    Pong { event_id: serde_json::Value },
    /// Keep-alive heartbeat, sent on a fixed interval while connected
    UserActivity,
}

/// Incoming socket message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Liveness probe; must be answered with a matching pong or the remote
    /// treats the connection as dead
    Ping { ping_event: PingEvent },
    /// Agent text turn
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    /// Synthesized agent speech
    Audio { audio_event: AudioEvent },
    /// Informational notice, not actionable
    SystemMessage { message: String },
    /// Any recognized-shape message with an unknown `type`
    #[serde(other)]
    Unknown,
}

/// Payload of an inbound `ping`
#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    /// Opaque id to echo back; servers send either strings or integers
    pub event_id: serde_json::Value,
}

/// Payload of an inbound `agent_response`
#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    pub agent_response: String,
}

/// Payload of an inbound `audio` message
#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    /// Base64-encoded audio payload
    pub audio_base_64: String,
    /// Declared payload format; absent means a compressed MPEG container
    #[serde(default)]
    pub format: Option<String>,
}

/// Audio payload container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Compressed MPEG audio (the default)
    Mpeg,
    /// Raw signed 16-bit little-endian PCM at 16 kHz
    Pcm16k,
}

impl AudioEvent {
    /// Resolve the declared format, defaulting to MPEG
    #[must_use]
    pub fn audio_format(&self) -> AudioFormat {
        match self.format.as_deref() {
            Some("pcm_16000") => AudioFormat::Pcm16k,
            _ => AudioFormat::Mpeg,
        }
    }
}

/// Decode one inbound frame.
///
/// Returns `None` for malformed JSON; the caller drops the message and the
/// connection continues.
#[must_use]
pub fn decode(text: &str) -> Option<Inbound> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::debug!(error = %e, "dropping undecodable inbound message");
            None
        }
    }
}

/// Encode one outbound message to its wire form
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode(msg: &Outbound) -> crate::Result<String> {
    Ok(serde_json::to_string(msg)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiation_carries_override() {
        let msg = Outbound::ConversationInitiationClientData {
            conversation_config_override: ConfigOverride::new(Some("v_123".to_string()), "vi"),
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"type\":\"conversation_initiation_client_data\""));
        assert!(json.contains("\"voice_id\":\"v_123\""));
        assert!(json.contains("\"language\":\"vi\""));
    }

    #[test]
    fn initiation_null_voice() {
        let msg = Outbound::ConversationInitiationClientData {
            conversation_config_override: ConfigOverride::new(None, "auto"),
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"voice_id\":null"));
    }

    #[test]
    fn audio_chunk_serializes() {
        let msg = Outbound::UserAudioChunk {
            user_audio_chunk: "AAAA".to_string(),
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"type\":\"user_audio_chunk\""));
        assert!(json.contains("\"user_audio_chunk\":\"AAAA\""));
    }

    #[test]
    fn user_activity_is_bare() {
        let json = encode(&Outbound::UserActivity).unwrap();
        assert_eq!(json, "{\"type\":\"user_activity\"}");
    }

    #[test]
    fn ping_deserializes_string_id() {
        let msg = decode(r#"{"type":"ping","ping_event":{"event_id":"abc"}}"#).unwrap();
        match msg {
            Inbound::Ping { ping_event } => assert_eq!(ping_event.event_id, "abc"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ping_deserializes_numeric_id() {
        let msg = decode(r#"{"type":"ping","ping_event":{"event_id":42}}"#).unwrap();
        match msg {
            Inbound::Ping { ping_event } => assert_eq!(ping_event.event_id, 42),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn pong_echoes_event_id() {
        let msg = Outbound::Pong {
            event_id: serde_json::Value::String("abc".to_string()),
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"type\":\"pong\""));
        assert!(json.contains("\"event_id\":\"abc\""));
    }

    #[test]
    fn agent_response_deserializes() {
        let msg = decode(
            r#"{"type":"agent_response","agent_response_event":{"agent_response":"hello"}}"#,
        )
        .unwrap();
        match msg {
            Inbound::AgentResponse {
                agent_response_event,
            } => assert_eq!(agent_response_event.agent_response, "hello"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn audio_format_defaults_to_mpeg() {
        let msg = decode(r#"{"type":"audio","audio_event":{"audio_base_64":"AAAA"}}"#).unwrap();
        match msg {
            Inbound::Audio { audio_event } => {
                assert_eq!(audio_event.audio_format(), AudioFormat::Mpeg);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn audio_format_pcm_16000() {
        let msg = decode(
            r#"{"type":"audio","audio_event":{"audio_base_64":"AAAA","format":"pcm_16000"}}"#,
        )
        .unwrap();
        match msg {
            Inbound::Audio { audio_event } => {
                assert_eq!(audio_event.audio_format(), AudioFormat::Pcm16k);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let msg = decode(r#"{"type":"interruption","whatever":1}"#).unwrap();
        assert!(matches!(msg, Inbound::Unknown));
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert!(decode("not json").is_none());
        assert!(decode(r#"{"type":"ping"}"#).is_none());
    }
}

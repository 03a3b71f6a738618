//! Session client task
//!
//! Owns exactly one socket connection and, while connected, the microphone
//! capture resource. Runs the protocol state machine as a single select loop:
//! encoded frames in capture order, inbound traffic dispatched to the
//! playback queue or the event stream, and a fixed-interval activity
//! heartbeat. Teardown always stops capture before closing the transport so
//! no frame is produced for a dead socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use regex::Regex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio::{AudioCapture, PlaybackHandle, PlaybackItem};
use crate::protocol::{self, ConfigOverride, Inbound, Outbound};
use crate::session::{ConnectionState, SessionConfig, SessionEvent};
use crate::{Error, Result};

/// Interval of the user-activity keep-alive while connected
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

type WsSink = futures::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    Message,
>;

/// Commands accepted by a running session client
#[derive(Debug)]
pub(crate) enum Command {
    /// Send a user text turn
    SendText(String),
    /// Tear the session down as an explicit user end
    Shutdown,
}

/// How the session client finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    /// Explicit end (user action or natural-end heuristic)
    Ended,
    /// Transport failure or unexpected close
    Failed {
        /// Whether the reconnection policy may be engaged
        recoverable: bool,
    },
}

/// Everything a session client task needs, handed over at spawn
pub(crate) struct ClientParams {
    pub url: String,
    pub config: SessionConfig,
    pub audio_enabled: bool,
    pub end_phrases: Arc<EndPhrases>,
    pub manual_end: Arc<AtomicBool>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub playback: PlaybackHandle,
    pub cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub connected_tx: oneshot::Sender<Result<()>>,
    pub state: Arc<watch::Sender<ConnectionState>>,
}

/// Run one session to completion.
///
/// `connected_tx` resolves once the `Connected` state is reached (initiation
/// sent, capture running) or with the error that prevented it.
#[allow(clippy::too_many_lines)]
pub(crate) async fn run(params: ClientParams) -> SessionOutcome {
    let ClientParams {
        url,
        config,
        audio_enabled,
        end_phrases,
        manual_end,
        events,
        playback,
        mut cmd_rx,
        connected_tx,
        state,
    } = params;

    let session_id = uuid::Uuid::new_v4();
    set_state(&state, &events, ConnectionState::Connecting);

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            tracing::warn!(session = %session_id, error = %e, "socket connect failed");
            set_state(&state, &events, ConnectionState::Failed);
            let _ = connected_tx.send(Err(Error::Transport(format!("connect failed: {e}"))));
            return SessionOutcome::Failed { recoverable: true };
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Initiation goes out first; configuration is fixed for this connection
    let init = Outbound::ConversationInitiationClientData {
        conversation_config_override: ConfigOverride::new(
            config.voice_id.clone(),
            config.language.clone(),
        ),
    };
    if let Err(e) = send(&mut ws_tx, &init).await {
        set_state(&state, &events, ConnectionState::Failed);
        let _ = connected_tx.send(Err(e));
        return SessionOutcome::Failed { recoverable: true };
    }

    // Microphone is acquired on Connected entry; denial is fatal to the
    // session and surfaced distinctly from transport failures
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let mut capture = None;
    if audio_enabled {
        match AudioCapture::start(frame_tx.clone()) {
            Ok(cap) => {
                tracing::debug!(
                    session = %session_id,
                    sample_rate = cap.sample_rate(),
                    "microphone capture started"
                );
                capture = Some(cap);
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "microphone unavailable");
                let _ = ws_tx.close().await;
                set_state(&state, &events, ConnectionState::Failed);
                let _ = connected_tx.send(Err(e));
                return SessionOutcome::Failed { recoverable: false };
            }
        }
    }

    set_state(&state, &events, ConnectionState::Connected);
    tracing::info!(
        session = %session_id,
        voice = ?config.voice_id,
        language = %config.language,
        "session connected"
    );
    let _ = connected_tx.send(Ok(()));

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );
    let mut last_agent_text = String::new();

    let outcome = loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                // A sender is retained locally, so recv only yields frames
                if let Some(frame) = frame {
                    let chunk = Outbound::UserAudioChunk { user_audio_chunk: frame.data };
                    if let Err(e) = send(&mut ws_tx, &chunk).await {
                        tracing::warn!(session = %session_id, error = %e, "audio send failed");
                        break fail_or_end(&manual_end);
                    }
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match handle_inbound(
                        &text,
                        &mut ws_tx,
                        &events,
                        &playback,
                        &end_phrases,
                        &mut last_agent_text,
                    ).await {
                        Ok(InboundAction::Continue) => {}
                        Ok(InboundAction::EndConversation) => {
                            tracing::info!(session = %session_id, "agent signaled end of conversation");
                            manual_end.store(true, Ordering::SeqCst);
                            let _ = events.send(SessionEvent::ConversationEnded);
                            break SessionOutcome::Ended;
                        }
                        Err(e) => {
                            tracing::warn!(session = %session_id, error = %e, "socket write failed");
                            break fail_or_end(&manual_end);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(session = %session_id, "socket closed by remote");
                    break fail_or_end(&manual_end);
                }
                Some(Ok(_)) => {} // binary and control frames are not part of the protocol
                Some(Err(e)) => {
                    tracing::warn!(session = %session_id, error = %e, "socket error");
                    break fail_or_end(&manual_end);
                }
            },
            _ = heartbeat.tick() => {
                if let Err(e) = send(&mut ws_tx, &Outbound::UserActivity).await {
                    tracing::warn!(session = %session_id, error = %e, "heartbeat send failed");
                    break fail_or_end(&manual_end);
                }
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::SendText(text)) => {
                    let tagged = wrap_with_voice_label(&text, config.voice_label.as_deref());
                    let result = send(&mut ws_tx, &Outbound::UserMessage { text: tagged }).await;
                    let result = match result {
                        Ok(()) => send(&mut ws_tx, &Outbound::UserActivity).await,
                        err => err,
                    };
                    if let Err(e) = result {
                        tracing::warn!(session = %session_id, error = %e, "text send failed");
                        break fail_or_end(&manual_end);
                    }
                }
                Some(Command::Shutdown) | None => {
                    manual_end.store(true, Ordering::SeqCst);
                    break SessionOutcome::Ended;
                }
            },
        }
    };

    // Teardown order is fixed: release the microphone first so no further
    // frames are produced, flush what the encoder already emitted, then close
    // the transport exactly once. Writes to a dead socket fail silently.
    if let Some(mut cap) = capture.take() {
        cap.stop();
    }
    while let Ok(frame) = frame_rx.try_recv() {
        let chunk = Outbound::UserAudioChunk { user_audio_chunk: frame.data };
        if send(&mut ws_tx, &chunk).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;

    let final_state = match outcome {
        SessionOutcome::Ended => ConnectionState::Ended,
        SessionOutcome::Failed { .. } => ConnectionState::Failed,
    };
    set_state(&state, &events, final_state);
    tracing::info!(session = %session_id, state = %final_state, "session closed");
    outcome
}

/// An unexpected close after manual end is still a clean end
fn fail_or_end(manual_end: &AtomicBool) -> SessionOutcome {
    if manual_end.load(Ordering::SeqCst) {
        SessionOutcome::Ended
    } else {
        SessionOutcome::Failed { recoverable: true }
    }
}

enum InboundAction {
    Continue,
    EndConversation,
}

/// Dispatch one inbound frame.
///
/// Decode failures are dropped here; the only error path out is a failed
/// socket write (answering a ping).
async fn handle_inbound(
    text: &str,
    ws_tx: &mut WsSink,
    events: &mpsc::UnboundedSender<SessionEvent>,
    playback: &PlaybackHandle,
    end_phrases: &EndPhrases,
    last_agent_text: &mut String,
) -> Result<InboundAction> {
    let Some(msg) = protocol::decode(text) else {
        return Ok(InboundAction::Continue);
    };

    match msg {
        Inbound::Ping { ping_event } => {
            // Answered before any other outbound message
            send(
                ws_tx,
                &Outbound::Pong {
                    event_id: ping_event.event_id,
                },
            )
            .await?;
        }
        Inbound::AgentResponse {
            agent_response_event,
        } => {
            let text = agent_response_event.agent_response;
            if !text.trim().is_empty() && text.trim() != last_agent_text.trim() {
                last_agent_text.clone_from(&text);
                let _ = events.send(SessionEvent::AgentText(text.clone()));
            }
            if end_phrases.matches(&text) {
                return Ok(InboundAction::EndConversation);
            }
        }
        Inbound::Audio { audio_event } => match BASE64.decode(&audio_event.audio_base_64) {
            Ok(bytes) => playback.enqueue(PlaybackItem {
                bytes,
                format: audio_event.audio_format(),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "dropping audio payload with invalid base64");
            }
        },
        Inbound::SystemMessage { message } => {
            tracing::info!(message = %message, "system message");
            let _ = events.send(SessionEvent::SystemNotice(message));
        }
        Inbound::Unknown => {
            tracing::debug!("ignoring unrecognized message type");
        }
    }
    Ok(InboundAction::Continue)
}

async fn send(ws_tx: &mut WsSink, msg: &Outbound) -> Result<()> {
    let text = protocol::encode(msg)?;
    ws_tx
        .send(Message::Text(text))
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

fn set_state(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    value: ConnectionState,
) {
    let _ = state.send(value);
    let _ = events.send(SessionEvent::State(value));
}

/// Wrap outbound text in the active voice label, `<label>text</label>`
fn wrap_with_voice_label(text: &str, label: Option<&str>) -> String {
    match label {
        Some(label) if !label.is_empty() => format!("<{label}>{text}</{label}>"),
        _ => text.to_string(),
    }
}

/// Closed-vocabulary natural-end heuristic over agent text.
///
/// Best-effort only: the remote has no acknowledgment protocol for this, so
/// a match triggers the same teardown as an explicit hang-up.
#[derive(Debug)]
pub struct EndPhrases {
    pattern: Option<Regex>,
}

impl EndPhrases {
    /// Compile a phrase list into a case-insensitive word-bounded matcher
    #[must_use]
    pub fn new(phrases: &[String]) -> Self {
        let alternatives: Vec<String> = phrases
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Self { pattern: None };
        }

        let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
        match Regex::new(&pattern) {
            Ok(re) => Self { pattern: Some(re) },
            Err(e) => {
                tracing::warn!(error = %e, "invalid end-phrase pattern, heuristic disabled");
                Self { pattern: None }
            }
        }
    }

    /// Default closed vocabulary
    #[must_use]
    pub fn default_phrases() -> Vec<String> {
        [
            "goodbye",
            "end call",
            "bye",
            "tạm biệt",
            "hẹn gặp lại",
            "kết thúc cuộc gọi",
            "cuộc gọi kết thúc",
        ]
        .map(String::from)
        .to_vec()
    }

    /// Whether the text contains any end phrase
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(text))
    }
}

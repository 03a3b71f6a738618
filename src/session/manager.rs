//! Session lifecycle coordination
//!
//! The [`SessionManager`] is constructed once per process and owns every
//! piece of lifecycle state: the session lock, the manual-end latch, the
//! current configuration, the reconnection policy, and the single active
//! session client. There are no ambient globals; callers hold an `Arc` and
//! read state through it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::audio::{AudioSink, PlaybackHandle, PlaybackQueue};
use crate::providers::SocketUrlProvider;
use crate::session::client::{self, ClientParams, Command, EndPhrases, SessionOutcome};
use crate::session::{ConnectionState, ReconnectPolicy, SessionConfig, SessionEvent};
use crate::{Error, Result};

/// Process-wide guard against concurrent duplicate sessions.
///
/// The sole arbiter of "is a session already running"; consulted by user
/// starts, automatic reconnects, and reconfiguration alike.
#[derive(Debug, Default)]
pub struct SessionLock {
    inner: Mutex<LockState>,
}

#[derive(Debug, Default)]
struct LockState {
    active: bool,
    connecting: bool,
}

impl SessionLock {
    /// Claim the connecting slot.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionActive` (with no side effects) if a session is
    /// already active or connecting.
    pub fn request_start(&self) -> Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.active || state.connecting {
            return Err(Error::SessionActive);
        }
        state.connecting = true;
        Ok(())
    }

    /// Promote the connecting session to active
    pub fn mark_connected(&self) {
        let mut state = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.active = true;
        state.connecting = false;
    }

    /// Release the slot entirely
    pub fn mark_disconnected(&self) {
        let mut state = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.active = false;
        state.connecting = false;
    }

    /// Whether a session is active or connecting
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        let state = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.active || state.connecting
    }
}

/// Construction-time options for the manager
pub struct SessionOptions {
    /// Initial session configuration (voice, language, label)
    pub config: SessionConfig,
    /// Whether to acquire the microphone on connect
    pub audio_enabled: bool,
    /// Natural-end phrase vocabulary
    pub end_phrases: Vec<String>,
    /// Backoff policy for unexpected disconnects
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            config: SessionConfig {
                voice_id: None,
                language: "auto".to_string(),
                voice_label: None,
            },
            audio_enabled: true,
            end_phrases: EndPhrases::default_phrases(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

struct ActiveSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

/// Owns all session lifecycle state and the single active session client
pub struct SessionManager {
    urls: Arc<dyn SocketUrlProvider>,
    lock: SessionLock,
    manual_end: Arc<AtomicBool>,
    config: Mutex<SessionConfig>,
    policy: Mutex<ReconnectPolicy>,
    end_phrases: Arc<EndPhrases>,
    audio_enabled: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    playback: PlaybackHandle,
    #[allow(dead_code)]
    playback_queue: PlaybackQueue,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    /// Build the manager and its event stream.
    ///
    /// `sink` receives all session playback; tests substitute a recording
    /// sink, the binary passes the device sink.
    #[must_use]
    pub fn new(
        urls: Arc<dyn SocketUrlProvider>,
        sink: Box<dyn AudioSink>,
        options: SessionOptions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let playback_queue = PlaybackQueue::spawn(sink);

        let manager = Arc::new(Self {
            urls,
            lock: SessionLock::default(),
            manual_end: Arc::new(AtomicBool::new(false)),
            config: Mutex::new(options.config),
            policy: Mutex::new(options.reconnect),
            end_phrases: Arc::new(EndPhrases::new(&options.end_phrases)),
            audio_enabled: options.audio_enabled,
            events: events_tx,
            state_tx: Arc::new(state_tx),
            state_rx,
            playback: playback_queue.handle(),
            playback_queue,
            active: Mutex::new(None),
        });

        (manager, events_rx)
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle phase changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Configuration the next connection will use
    #[must_use]
    pub fn current_config(&self) -> SessionConfig {
        self.config
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Start a new session lineage.
    ///
    /// Clears the manual-end latch, then connects. Does not return success
    /// until the `Connected` state is reached.
    ///
    /// # Errors
    ///
    /// `Error::SessionActive` if a session is already running or connecting;
    /// `Error::Audio` on microphone denial; `Error::Console` / transport
    /// errors when the connection cannot be established.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.manual_end.store(false, Ordering::SeqCst);
        self.start_internal().await
    }

    /// Connect without touching the manual-end latch (reconnect path)
    async fn start_internal(self: &Arc<Self>) -> Result<()> {
        self.lock.request_start()?;
        match self.open_session().await {
            Ok(()) => {
                self.lock.mark_connected();
                self.policy
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .reset();
                Ok(())
            }
            Err(e) => {
                self.lock.mark_disconnected();
                Err(e)
            }
        }
    }

    async fn open_session(self: &Arc<Self>) -> Result<()> {
        let url = self.urls.signed_socket_url().await?;
        let config = self.current_config();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = oneshot::channel();

        let params = ClientParams {
            url,
            config,
            audio_enabled: self.audio_enabled,
            end_phrases: Arc::clone(&self.end_phrases),
            manual_end: Arc::clone(&self.manual_end),
            events: self.events.clone(),
            playback: self.playback.clone(),
            cmd_rx,
            connected_tx,
            state: Arc::clone(&self.state_tx),
        };
        let task = tokio::spawn(client::run(params));

        match connected_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = task.await;
                return Err(e);
            }
            Err(_) => {
                return Err(Error::Transport(
                    "session task exited before connecting".to_string(),
                ));
            }
        }

        *self
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(ActiveSession { cmd_tx });

        // Supervise the session; engage the reconnect policy on unexpected loss
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "session task aborted");
                    SessionOutcome::Failed { recoverable: false }
                }
            };
            manager.on_session_closed(outcome).await;
        });

        Ok(())
    }

    async fn on_session_closed(self: Arc<Self>, outcome: SessionOutcome) {
        *self
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        self.lock.mark_disconnected();

        if matches!(outcome, SessionOutcome::Failed { recoverable: true })
            && !self.manual_end.load(Ordering::SeqCst)
        {
            self.reconnect_loop().await;
        }
    }

    // Returns a boxed future so this recursion point (reconnect ->
    // start_internal -> open_session -> supervise task -> on_session_closed ->
    // reconnect) has a concrete `Send` type, breaking the auto-trait inference
    // cycle that would otherwise make the supervisor task's future non-`Send`.
    fn reconnect_loop(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        loop {
            let delay = self
                .policy
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .next_delay();
            let Some(delay) = delay else {
                tracing::warn!("reconnect attempts exhausted");
                let _ = self.events.send(SessionEvent::RetriesExhausted);
                break;
            };

            tracing::info!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "scheduling reconnect");
            tokio::time::sleep(delay).await;

            // The latch also cancels retries that were already scheduled
            if self.manual_end.load(Ordering::SeqCst) {
                tracing::debug!("reconnect cancelled by manual end");
                break;
            }

            match self.start_internal().await {
                Ok(()) => {
                    tracing::info!("reconnected");
                    break;
                }
                Err(Error::SessionActive) => break,
                Err(e @ Error::Audio(_)) => {
                    tracing::error!(error = %e, "reconnect aborted");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reconnect attempt failed");
                }
            }
        }
        })
    }

    /// End the session by explicit user action.
    ///
    /// Sets the manual-end latch (permanently disabling reconnection for this
    /// lineage), then waits for the client to stop capture and close the
    /// transport. Safe to call when idle.
    pub async fn end(&self) {
        self.manual_end.store(true, Ordering::SeqCst);
        loop {
            if !self.lock.is_engaged() {
                break;
            }
            let cmd_tx = self
                .active
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .as_ref()
                .map(|a| a.cmd_tx.clone());
            if let Some(tx) = cmd_tx {
                let _ = tx.send(Command::Shutdown);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send a user text turn, starting a session first if none is connected.
    ///
    /// # Errors
    ///
    /// Returns connection errors from the implicit start, or
    /// `Error::NotConnected` if the session drops mid-send.
    pub async fn send_text(self: &Arc<Self>, text: &str) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            match self.start().await {
                Ok(()) => {}
                Err(Error::SessionActive) => {
                    // Another caller is connecting; wait for the outcome
                    let mut rx = self.state_rx.clone();
                    let reached = rx
                        .wait_for(|s| {
                            !matches!(
                                s,
                                ConnectionState::Idle | ConnectionState::Connecting
                            )
                        })
                        .await;
                    match reached {
                        Ok(s) if *s == ConnectionState::Connected => {}
                        _ => return Err(Error::NotConnected),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let cmd_tx = self
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|a| a.cmd_tx.clone())
            .ok_or(Error::NotConnected)?;
        cmd_tx
            .send(Command::SendText(text.to_string()))
            .map_err(|_| Error::NotConnected)
    }

    /// Apply a new voice/language configuration.
    ///
    /// Parameters are connection-time-only: when a session is running it is
    /// torn down completely (capture stopped, transport closed) and only then
    /// is a new one started with the updated configuration.
    ///
    /// # Errors
    ///
    /// Returns the error from the replacement connection attempt.
    pub async fn change_voice(self: &Arc<Self>, config: SessionConfig) -> Result<()> {
        let was_engaged = self.lock.is_engaged();
        *self
            .config
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = config;

        if was_engaged {
            self.end().await;
            self.start().await?;
        }
        Ok(())
    }
}

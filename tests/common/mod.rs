//! Shared test utilities
//!
//! An in-process WebSocket agent endpoint and a recording playback sink, so
//! the session pipeline can be exercised without a console, microphone, or
//! speakers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use colloquy::audio::AudioSink;
use colloquy::{
    Error, ReconnectPolicy, Result, SessionConfig, SessionEvent, SessionManager, SessionOptions,
    SocketUrlProvider,
};

/// Await a future with a test deadline
pub async fn within<T>(ms: u64, fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_millis(ms), fut)
        .await
        .expect("timed out")
}

/// One accepted conversation socket on the fake agent
pub struct AgentConn {
    ws: WebSocketStream<TcpStream>,
}

impl AgentConn {
    /// Next inbound text message, parsed as JSON. `None` once the peer closes.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).expect("client sent invalid JSON"));
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(_) => return None,
            }
        }
    }

    /// Send one JSON message to the client
    pub async fn send_json(&mut self, value: &serde_json::Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .expect("send to client failed");
    }

    /// Send a raw text frame, bypassing JSON encoding
    pub async fn ws_send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send to client failed");
    }

    /// Close the socket from the agent side
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Read until the client closes its side
    pub async fn wait_closed(&mut self) {
        while let Some(msg) = self.ws.next().await {
            if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    }
}

/// In-process WebSocket endpoint standing in for the remote agent
pub struct FakeAgent {
    pub url: String,
    conns: mpsc::UnboundedReceiver<AgentConn>,
    accept_task: JoinHandle<()>,
}

impl FakeAgent {
    /// Bind a listener and start accepting conversation sockets
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake agent");
        let addr = listener.local_addr().expect("local addr");
        let (tx, conns) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                if tx.send(AgentConn { ws }).is_err() {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            conns,
            accept_task,
        }
    }

    /// Wait for the next client connection
    pub async fn next_conn(&mut self) -> AgentConn {
        self.conns.recv().await.expect("fake agent stopped")
    }

    /// Assert no connection arrives within the window
    pub async fn expect_no_conn(&mut self, ms: u64) {
        let result = tokio::time::timeout(Duration::from_millis(ms), self.conns.recv()).await;
        assert!(result.is_err(), "unexpected connection to fake agent");
    }

    /// Stop accepting; later connection attempts are refused
    pub fn stop(&self) {
        self.accept_task.abort();
    }
}

/// Serves the fake agent's URL as a pre-authorized socket URL
pub struct StaticUrls(pub String);

#[async_trait]
impl SocketUrlProvider for StaticUrls {
    async fn signed_socket_url(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// A URL provider whose console is down
pub struct FailingUrls;

#[async_trait]
impl SocketUrlProvider for FailingUrls {
    async fn signed_socket_url(&self) -> Result<String> {
        Err(Error::Console("console unreachable".to_string()))
    }
}

/// Records every playback request instead of touching audio hardware
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub plays: Arc<Mutex<Vec<(usize, u32)>>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        self.plays.lock().unwrap().push((samples.len(), sample_rate));
        Ok(())
    }
}

/// Session options tuned for fast tests: no audio hardware, short backoff
pub fn test_options(config: SessionConfig) -> SessionOptions {
    SessionOptions {
        config,
        audio_enabled: false,
        reconnect: ReconnectPolicy::new(5, Duration::from_millis(50), Duration::from_millis(400)),
        ..SessionOptions::default()
    }
}

/// Options with a tiny retry budget, for exhaustion tests
pub fn fast_fail_options(config: SessionConfig) -> SessionOptions {
    SessionOptions {
        reconnect: ReconnectPolicy::new(2, Duration::from_millis(10), Duration::from_millis(50)),
        ..test_options(config)
    }
}

/// Build a manager pointed at `url`, with a recording sink
pub fn test_manager(
    url: &str,
    config: SessionConfig,
) -> (
    Arc<SessionManager>,
    mpsc::UnboundedReceiver<SessionEvent>,
    RecordingSink,
) {
    let sink = RecordingSink::default();
    let (manager, events) = SessionManager::new(
        Arc::new(StaticUrls(url.to_string())),
        Box::new(sink.clone()),
        test_options(config),
    );
    (manager, events, sink)
}

/// Drain events until one matches, with a deadline
pub async fn next_matching(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    within(2000, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
}

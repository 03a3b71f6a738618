//! Session state machine integration tests
//!
//! Drives a real session client against an in-process WebSocket agent.
//! Audio hardware is disabled; playback goes to a recording sink.

mod common;

use common::{FailingUrls, FakeAgent, RecordingSink, next_matching, test_options, within};
use serde_json::json;

use colloquy::{ConnectionState, Error, SessionConfig, SessionEvent, SessionManager};

use std::sync::Arc;
use std::time::Duration;

fn config_with_voice(voice_id: &str, language: &str) -> SessionConfig {
    SessionConfig {
        voice_id: Some(voice_id.to_string()),
        language: language.to_string(),
        voice_label: None,
    }
}

#[tokio::test]
async fn initiation_is_first_message_and_carries_config() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, _events, _sink) = common::test_manager(&agent.url, config_with_voice("v9", "vi"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;

    let first = within(2000, conn.recv_json()).await.expect("first message");
    assert_eq!(first["type"], "conversation_initiation_client_data");
    assert_eq!(
        first["conversation_config_override"]["tts"]["voice_id"],
        "v9"
    );
    assert_eq!(
        first["conversation_config_override"]["agent"]["language"],
        "vi"
    );

    manager.end().await;
}

#[tokio::test]
async fn ping_is_answered_with_matching_pong() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, _events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v1", "auto"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await.expect("init");

    conn.send_json(&json!({
        "type": "ping",
        "ping_event": { "event_id": "abc" }
    }))
    .await;

    let reply = within(2000, conn.recv_json()).await.expect("pong");
    assert_eq!(reply["type"], "pong");
    assert_eq!(reply["event_id"], "abc");

    manager.end().await;
}

#[tokio::test]
async fn agent_text_surfaces_once_per_distinct_message() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, mut events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v1", "auto"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await;

    let response = json!({
        "type": "agent_response",
        "agent_response_event": { "agent_response": "Xin chào!" }
    });
    conn.send_json(&response).await;
    conn.send_json(&response).await; // duplicate, must be suppressed
    conn.send_json(&json!({
        "type": "agent_response",
        "agent_response_event": { "agent_response": "How can I help?" }
    }))
    .await;

    let first = next_matching(&mut events, |e| matches!(e, SessionEvent::AgentText(_))).await;
    assert_eq!(first, SessionEvent::AgentText("Xin chào!".to_string()));

    let second = next_matching(&mut events, |e| matches!(e, SessionEvent::AgentText(_))).await;
    assert_eq!(
        second,
        SessionEvent::AgentText("How can I help?".to_string())
    );

    manager.end().await;
}

#[tokio::test]
async fn inbound_audio_plays_in_arrival_order() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, _events, sink) = common::test_manager(&agent.url, config_with_voice("v1", "auto"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await;

    // Two raw PCM payloads of different lengths, 100 and 50 samples
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD;
    let first = b64.encode(vec![0u8; 200]);
    let second = b64.encode(vec![0u8; 100]);

    conn.send_json(&json!({
        "type": "audio",
        "audio_event": { "audio_base_64": first, "format": "pcm_16000" }
    }))
    .await;
    conn.send_json(&json!({
        "type": "audio",
        "audio_event": { "audio_base_64": second, "format": "pcm_16000" }
    }))
    .await;

    within(2000, async {
        loop {
            if sink.plays.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let plays = sink.plays.lock().unwrap().clone();
    assert_eq!(plays, vec![(100, 16_000), (50, 16_000)]);

    manager.end().await;
}

#[tokio::test]
async fn malformed_inbound_traffic_is_ignored() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, mut events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v1", "auto"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await;

    // Garbage, an unknown type, and a ping missing its payload
    conn.ws_send_text("this is not json").await;
    conn.send_json(&json!({ "type": "interruption" })).await;
    conn.ws_send_text(r#"{"type":"ping"}"#).await;

    // The connection survives: a real message still gets through
    conn.send_json(&json!({
        "type": "agent_response",
        "agent_response_event": { "agent_response": "still here" }
    }))
    .await;

    let event = next_matching(&mut events, |e| matches!(e, SessionEvent::AgentText(_))).await;
    assert_eq!(event, SessionEvent::AgentText("still here".to_string()));
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.end().await;
}

#[tokio::test]
async fn user_text_is_wrapped_with_the_voice_label() {
    let mut agent = FakeAgent::spawn().await;
    let config = SessionConfig {
        voice_id: Some("v1".to_string()),
        language: "en".to_string(),
        voice_label: Some("mai".to_string()),
    };
    let (manager, _events, _sink) = common::test_manager(&agent.url, config);

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await;

    manager.send_text("hello there").await.expect("send");

    let msg = within(2000, conn.recv_json()).await.expect("user message");
    assert_eq!(msg["type"], "user_message");
    assert_eq!(msg["text"], "<mai>hello there</mai>");

    // A user-activity signal follows every text turn
    let activity = within(2000, conn.recv_json()).await.expect("activity");
    assert_eq!(activity["type"], "user_activity");

    manager.end().await;
}

#[tokio::test]
async fn concurrent_start_is_rejected_without_side_effects() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, _events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v1", "auto"));

    manager.start().await.expect("first start");
    assert!(matches!(manager.start().await, Err(Error::SessionActive)));
    assert_eq!(manager.state(), ConnectionState::Connected);

    // Exactly one socket was opened
    let _conn = within(2000, agent.next_conn()).await;
    agent.expect_no_conn(200).await;

    manager.end().await;
}

#[tokio::test]
async fn manual_end_suppresses_reconnection() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, _events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v1", "auto"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await;

    manager.end().await;
    assert_eq!(manager.state(), ConnectionState::Ended);
    conn.wait_closed().await;

    // Backoff base is 50ms; half a second of silence means no retry fired
    agent.expect_no_conn(500).await;
}

#[tokio::test]
async fn unexpected_close_reconnects_with_backoff() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, mut events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v7", "en"));

    manager.start().await.expect("start");
    let conn = within(2000, agent.next_conn()).await;

    // Agent drops the socket without warning
    conn.close().await;

    let _failed = next_matching(&mut events, |e| {
        matches!(e, SessionEvent::State(ConnectionState::Failed))
    })
    .await;

    // A replacement connection arrives, re-initiated with the same config
    let mut conn = within(3000, agent.next_conn()).await;
    let init = within(2000, conn.recv_json()).await.expect("re-init");
    assert_eq!(init["type"], "conversation_initiation_client_data");
    assert_eq!(init["conversation_config_override"]["tts"]["voice_id"], "v7");

    let _connected = next_matching(&mut events, |e| {
        matches!(e, SessionEvent::State(ConnectionState::Connected))
    })
    .await;

    manager.end().await;
}

#[tokio::test]
async fn reconnection_gives_up_after_the_attempt_ceiling() {
    let mut agent = FakeAgent::spawn().await;
    let url = agent.url.clone();

    let sink = RecordingSink::default();
    let (manager, mut events) = SessionManager::new(
        Arc::new(common::StaticUrls(url)),
        Box::new(sink),
        common::fast_fail_options(config_with_voice("v1", "auto")),
    );

    manager.start().await.expect("start");
    let conn = within(2000, agent.next_conn()).await;

    // Take the whole agent down; every retry will be refused
    agent.stop();
    conn.close().await;

    let event = next_matching(&mut events, |e| {
        matches!(e, SessionEvent::RetriesExhausted)
    })
    .await;
    assert_eq!(event, SessionEvent::RetriesExhausted);
    assert_eq!(manager.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn voice_change_tears_down_then_reinitiates() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, _events, _sink) = common::test_manager(&agent.url, config_with_voice("old", "vi"));

    manager.start().await.expect("start");
    let mut conn1 = within(2000, agent.next_conn()).await;
    let init1 = within(2000, conn1.recv_json()).await.expect("init");
    assert_eq!(
        init1["conversation_config_override"]["tts"]["voice_id"],
        "old"
    );

    manager
        .change_voice(config_with_voice("new", "en"))
        .await
        .expect("voice change");

    // Old transport closed before the new one initiates
    conn1.wait_closed().await;
    let mut conn2 = within(2000, agent.next_conn()).await;
    let init2 = within(2000, conn2.recv_json()).await.expect("init");
    assert_eq!(
        init2["conversation_config_override"]["tts"]["voice_id"],
        "new"
    );
    assert_eq!(
        init2["conversation_config_override"]["agent"]["language"],
        "en"
    );
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.end().await;
}

#[tokio::test]
async fn end_phrase_from_agent_ends_the_session() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, mut events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v1", "en"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await;

    conn.send_json(&json!({
        "type": "agent_response",
        "agent_response_event": { "agent_response": "It was a pleasure. Goodbye!" }
    }))
    .await;

    let _ended = next_matching(&mut events, |e| {
        matches!(e, SessionEvent::ConversationEnded)
    })
    .await;
    conn.wait_closed().await;

    within(2000, async {
        loop {
            if manager.state() == ConnectionState::Ended {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    // Heuristic end counts as manual: no reconnection
    agent.expect_no_conn(400).await;
}

#[tokio::test]
async fn system_message_surfaces_as_notice() {
    let mut agent = FakeAgent::spawn().await;
    let (manager, mut events, _sink) =
        common::test_manager(&agent.url, config_with_voice("v1", "auto"));

    manager.start().await.expect("start");
    let mut conn = within(2000, agent.next_conn()).await;
    let _init = within(2000, conn.recv_json()).await;

    conn.send_json(&json!({
        "type": "system_message",
        "message": "conversation will be recorded"
    }))
    .await;

    let event = next_matching(&mut events, |e| {
        matches!(e, SessionEvent::SystemNotice(_))
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::SystemNotice("conversation will be recorded".to_string())
    );

    manager.end().await;
}

#[tokio::test]
async fn console_failure_surfaces_and_releases_the_lock() {
    let sink = RecordingSink::default();
    let (manager, _events) = SessionManager::new(
        Arc::new(FailingUrls),
        Box::new(sink),
        test_options(config_with_voice("v1", "auto")),
    );

    let first = manager.start().await;
    assert!(matches!(first, Err(Error::Console(_))));

    // The lock was released; the second attempt fails the same way, not
    // with a capability-denied error
    let second = manager.start().await;
    assert!(matches!(second, Err(Error::Console(_))));
}

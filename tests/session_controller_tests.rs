// Session lifecycle tests against fake transport and capture devices
//
// Everything runs on tokio's paused clock, so backoff delays and playback
// timing are measured exactly without real waiting.

mod common;

use base64::Engine;
use common::{frame, harness, wait_for_status};
use loqa_live::transport::{OutboundFrame, TransportEvent};
use loqa_live::{MessageKind, Role, SessionStatus};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn parse_text(frame: OutboundFrame) -> Value {
    match frame {
        OutboundFrame::Text(text) => serde_json::from_str(&text).unwrap(),
        OutboundFrame::Close => panic!("expected a text frame, got close"),
    }
}

fn session_id_from(url: &str) -> &str {
    let start = url.find("callId=").unwrap() + "callId=".len();
    let end = url[start..].find('&').map(|i| start + i).unwrap_or(url.len());
    &url[start..end]
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_socket_and_sends_setup() {
    let mut h = harness();
    h.controller.connect().await.unwrap();

    let mut peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    let info = h.controller.info();
    let session_id = info.session_id.clone().unwrap();
    let (_, url) = &h.connector.opens()[0];
    assert_eq!(
        url,
        &format!("ws://localhost:8080/ws?callId={}&client=aiVoice", session_id)
    );
    assert!(info.started_at.is_some());

    let setup = parse_text(peer.outbound.recv().await.unwrap());
    assert_eq!(setup, json!({"type": "setup", "payload": {}}));
    assert_eq!(h.capture.starts(), 1, "Capture should start on open");
}

#[tokio::test(start_paused = true)]
async fn test_frames_forwarded_only_while_connected() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;
    let _setup = peer.outbound.recv().await.unwrap();

    assert!(h.capture.emit(frame(100)));
    let audio = parse_text(peer.outbound.recv().await.unwrap());
    assert_eq!(audio["type"], "realtime_input");
    assert_eq!(audio["payload"]["audio"]["mimeType"], "audio/pcm;rate=16000");
    let data = audio["payload"]["audio"]["data"].as_str().unwrap();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .unwrap();
    assert_eq!(bytes.len(), 1536 * 2);

    h.controller.disconnect(true).await.unwrap();
    assert!(!h.capture.is_capturing(), "Capture should be released");
    assert!(!h.capture.emit(frame(100)));
    assert_eq!(peer.outbound.recv().await.unwrap(), OutboundFrame::Close);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_then_terminal_error() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    h.connector.set_accept(false);
    let closed_at = Instant::now();
    peer.inbound
        .send(TransportEvent::Closed { code: 1006 })
        .await
        .unwrap();

    wait_for_status(&mut h.info, SessionStatus::Error).await;

    let opens = h.connector.opens();
    assert_eq!(opens.len(), 4, "Initial open plus three retries");

    let d0 = (opens[1].0 - closed_at).as_millis();
    let d1 = (opens[2].0 - opens[1].0).as_millis();
    let d2 = (opens[3].0 - opens[2].0).as_millis();
    assert!((1000..2000).contains(&d0), "d0 = {}", d0);
    assert!((2000..3000).contains(&d1), "d1 = {}", d1);
    assert!((4000..5000).contains(&d2), "d2 = {}", d2);

    // Retries reuse the logical session
    let first_id = session_id_from(&opens[0].1).to_string();
    for (_, url) in &opens[1..] {
        assert_eq!(session_id_from(url), first_id);
    }

    // Error is terminal: no further attempts
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.open_count(), 4);
    assert_eq!(h.controller.info().status, SessionStatus::Error);
    assert!(!h.capture.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_after_error_starts_fresh_session() {
    let mut h = harness();
    h.connector.set_accept(false);
    h.controller.connect().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Error).await;
    let failed_id = h.controller.info().session_id.unwrap();

    h.connector.set_accept(true);
    h.controller.connect().await.unwrap();
    let _peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    let info = h.controller.info();
    assert_ne!(info.session_id.unwrap(), failed_id);
    assert_eq!(info.reconnect_attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_keeps_session_and_log() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;
    let _setup = peer.outbound.recv().await.unwrap();

    assert!(h.controller.send_text("hello").await.unwrap());
    let session_id = h.controller.info().session_id.unwrap();

    peer.inbound
        .send(TransportEvent::Closed { code: 1006 })
        .await
        .unwrap();
    wait_for_status(&mut h.info, SessionStatus::Reconnecting).await;

    let _peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    let info = h.controller.info();
    assert_eq!(info.session_id.unwrap(), session_id);
    assert_eq!(info.reconnect_attempt, 0, "Open resets the attempt counter");
    assert_eq!(h.controller.messages().len(), 1);
    assert_eq!(h.capture.starts(), 2, "Capture restarts with the transport");
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_does_not_reconnect() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    peer.inbound
        .send(TransportEvent::Closed { code: 1000 })
        .await
        .unwrap();
    wait_for_status(&mut h.info, SessionStatus::Idle).await;

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent_and_cancels_pending_reconnect() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    peer.inbound
        .send(TransportEvent::Closed { code: 1006 })
        .await
        .unwrap();
    wait_for_status(&mut h.info, SessionStatus::Reconnecting).await;

    h.controller.disconnect(true).await.unwrap();
    h.controller.disconnect(true).await.unwrap();
    h.controller.disconnect(false).await.unwrap();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.open_count(), 1, "Pending reconnect should be cancelled");
    assert_eq!(h.controller.info().status, SessionStatus::Idle);
    assert_eq!(h.capture.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_text_requires_connection() {
    let mut h = harness();
    assert!(!h.controller.send_text("too early").await.unwrap());

    h.controller.connect().await.unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;
    let _setup = peer.outbound.recv().await.unwrap();

    assert!(!h.controller.send_text("   ").await.unwrap());
    assert!(h.controller.send_text("What's new?").await.unwrap());

    let content = parse_text(peer.outbound.recv().await.unwrap());
    assert_eq!(content["type"], "client_content");
    assert_eq!(content["payload"]["turns"][0]["parts"][0]["text"], "What's new?");
    assert_eq!(content["payload"]["turnComplete"], true);

    let messages = h.controller.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text, "What's new?");
    assert!(h.controller.info().thinking);

    h.controller.disconnect(true).await.unwrap();
    assert!(!h.controller.send_text("too late").await.unwrap());
    assert!(!h.controller.info().thinking);
}

#[tokio::test(start_paused = true)]
async fn test_tool_response_forwarded_when_connected() {
    let mut h = harness();
    let payload = json!({"functionResponses": [{"id": "call-1", "name": "lookup", "response": {"ok": true}}]});
    assert!(!h
        .controller
        .send_tool_response(payload.clone())
        .await
        .unwrap());

    h.controller.connect().await.unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;
    let _setup = peer.outbound.recv().await.unwrap();

    assert!(h
        .controller
        .send_tool_response(payload.clone())
        .await
        .unwrap());
    let sent = parse_text(peer.outbound.recv().await.unwrap());
    assert_eq!(sent["type"], "tool_response");
    assert_eq!(sent["payload"], payload);
}

#[tokio::test(start_paused = true)]
async fn test_termination_waits_for_playback_to_drain() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;
    let _setup = peer.outbound.recv().await.unwrap();

    // One second of silence at 24kHz
    let audio = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 48000]);
    let content = json!({"modelTurn": {"parts": [{"inlineData": {"data": audio}}]}});
    let started = Instant::now();
    peer.inbound
        .send(TransportEvent::Message(content.to_string()))
        .await
        .unwrap();
    peer.inbound
        .send(TransportEvent::Message(
            json!({"type": "session_terminated"}).to_string(),
        ))
        .await
        .unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(
        h.controller.info().status,
        SessionStatus::Connected,
        "Close should wait for playback"
    );

    wait_for_status(&mut h.info, SessionStatus::Idle).await;
    assert!(
        started.elapsed() >= Duration::from_secs(1),
        "Disconnected after {:?}",
        started.elapsed()
    );
    assert_eq!(peer.outbound.recv().await.unwrap(), OutboundFrame::Close);
}

#[tokio::test(start_paused = true)]
async fn test_termination_without_audio_disconnects_immediately() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    let started = Instant::now();
    peer.inbound
        .send(TransportEvent::Message(
            r#"{"type":"session_terminated"}"#.to_string(),
        ))
        .await
        .unwrap();

    wait_for_status(&mut h.info, SessionStatus::Idle).await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(h.connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_deferred_close_leaves_next_session_alone() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;
    let _setup = peer.outbound.recv().await.unwrap();
    let first_id = h.controller.info().session_id.unwrap();

    // One second of audio, then the agent ends the session
    let audio = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 48000]);
    let content = json!({"modelTurn": {"parts": [{"inlineData": {"data": audio}}]}});
    peer.inbound
        .send(TransportEvent::Message(content.to_string()))
        .await
        .unwrap();
    peer.inbound
        .send(TransportEvent::Message(
            json!({"type": "session_terminated"}).to_string(),
        ))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.controller.info().status, SessionStatus::Connected);

    // The user leaves and comes back before the tail has played out
    h.controller.disconnect(true).await.unwrap();
    assert_eq!(h.controller.info().status, SessionStatus::Idle);
    h.controller.connect().await.unwrap();
    let _next_peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    sleep(Duration::from_secs(3)).await;

    let info = h.controller.info();
    assert_eq!(info.status, SessionStatus::Connected, "Old tail must not close the new session");
    assert_ne!(info.session_id.as_deref(), Some(first_id.as_str()));
    assert_eq!(h.capture.starts(), 2);
    assert_eq!(h.capture.stops(), 1, "Exactly one teardown");
    assert_eq!(h.connector.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_transcripts_reach_message_log() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    // One turn, then a link, then the start of the next turn, each landing in
    // its own consolidation pass
    let batches = [
        vec![
            json!({"serverContent": {"modelTurn": {"parts": [{"text": "Hel"}]}}}),
            json!({"model_turn": {"parts": [{"text": "lo"}]}}),
            json!({"input_transcription": {"text": "Hi"}}),
            json!({"turnComplete": true}),
        ],
        vec![json!({"type": "link_bubble", "payload": {"url": "https://example.com", "alias": "Docs"}})],
        vec![json!({"outputTranscription": {"text": "Next"}})],
    ];

    for batch in batches {
        for message in batch {
            peer.inbound
                .send(TransportEvent::Message(message.to_string()))
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(50)).await;
    }

    let messages = h.controller.messages();
    assert_eq!(messages.len(), 4, "{:?}", messages);
    assert_eq!(messages[0].role, Role::Agent);
    assert_eq!(messages[0].text, "Hello");
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].text, "Hi");
    assert_eq!(messages[2].kind, MessageKind::Link);
    assert_eq!(messages[2].url.as_deref(), Some("https://example.com"));
    assert_eq!(messages[3].role, Role::Agent);
    assert_eq!(messages[3].text, "Next");
    assert!(!h.controller.info().thinking);
}

#[tokio::test(start_paused = true)]
async fn test_turn_complete_sets_thinking() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    peer.inbound
        .send(TransportEvent::Message(r#"{"turn_complete":true}"#.to_string()))
        .await
        .unwrap();
    h.info.wait_for(|i| i.thinking).await.unwrap();

    peer.inbound
        .send(TransportEvent::Message(
            r#"{"modelTurn":{"parts":[{"text":"ok"}]}}"#.to_string(),
        ))
        .await
        .unwrap();
    h.info.wait_for(|i| !i.thinking).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_inbound_is_skipped() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    for text in [
        "not json",
        r#"{"modelTurn":{"parts":[{"inlineData":{"data":"%%%"}}]}}"#,
        r#"{"turnComplete":"maybe"}"#,
        r#"{"type":"link_bubble"}"#,
    ] {
        peer.inbound
            .send(TransportEvent::Message(text.to_string()))
            .await
            .unwrap();
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.controller.info().status, SessionStatus::Connected);
    assert!(h.controller.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_degrades_audio_but_stays_connected() {
    let mut h = harness();
    h.capture.set_fail(true);

    h.controller.connect().await.unwrap();
    let _peer = h.peers.recv().await.unwrap();
    h.info
        .wait_for(|i| i.status == SessionStatus::Connected && i.audio_degraded)
        .await
        .unwrap();

    // Recovers on the next successful start
    h.capture.set_fail(false);
    h.controller.connect().await.unwrap();
    let _peer = h.peers.recv().await.unwrap();
    h.info
        .wait_for(|i| i.status == SessionStatus::Connected && !i.audio_degraded)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fresh_connect_clears_log() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    let _peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;
    assert!(h.controller.send_text("first session").await.unwrap());
    let first_id = h.controller.info().session_id.unwrap();

    h.controller.disconnect(true).await.unwrap();
    assert_eq!(h.controller.messages().len(), 1, "Log survives disconnect");

    h.controller.connect().await.unwrap();
    let _peer = h.peers.recv().await.unwrap();
    wait_for_status(&mut h.info, SessionStatus::Connected).await;

    assert!(h.controller.messages().is_empty());
    assert_ne!(h.controller.info().session_id.unwrap(), first_id);
}

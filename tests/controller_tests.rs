//! Tests for the session lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CollectingSink, MockInputHost, MockPeerFactory, MockTransport, ok_json, ok_sdp, response};
use parking_lot::Mutex;
use realtime_voice::controller::PeerEvent;
use realtime_voice::playback::RemoteTrack;
use realtime_voice::{
    FRAME_SAMPLES, AudioFrame, RouterCallbacks, SessionConfig, SessionController, SessionState,
    VoiceError,
};
use tokio::sync::mpsc;

const SESSION_JSON: &str = r#"{"id": "sess_1", "iceServers": [{"urls": "stun:stun.example.com"}]}"#;

fn config() -> SessionConfig {
    SessionConfig::new("client-1", "secret-1").with_server_url("https://voice.example.com")
}

#[tokio::test]
async fn test_connect_reaches_connected_in_order() {
    let transport = MockTransport::new(vec![ok_json(SESSION_JSON), ok_sdp("v=0\r\nanswer\r\n")]);
    let (factory, _events) = MockPeerFactory::new();
    let host = MockInputHost::accepting(&["default"]);
    let sink = CollectingSink::new();

    let mut controller =
        SessionController::new(config(), transport.clone(), factory.clone(), host, sink);
    assert_eq!(controller.state(), SessionState::Idle);

    controller.connect().await.unwrap();

    assert_eq!(controller.state(), SessionState::Connected);
    assert_eq!(controller.session_id(), Some("sess_1"));
    assert_eq!(transport.request_count(), 2);

    // ICE configuration passed through to the peer verbatim.
    let seen = factory.probe.ice_servers_seen.lock();
    let config = seen.as_ref().unwrap();
    assert_eq!(config.ice_servers.len(), 1);
    assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.example.com"]);

    assert!(*factory.probe.track_attached.lock());
    assert!(*factory.probe.offer_created.lock());
    assert_eq!(factory.probe.answer_applied.lock().as_deref(), Some("v=0\r\nanswer\r\n"));
}

#[tokio::test]
async fn test_session_creation_failure_closes_controller() {
    let transport = MockTransport::new(vec![response(500, "unavailable")]);
    let (factory, _events) = MockPeerFactory::new();
    let host = MockInputHost::accepting(&["default"]);

    let mut controller = SessionController::new(
        config(),
        transport.clone(),
        factory,
        host,
        CollectingSink::new(),
    );
    let err = controller.connect().await.unwrap_err();

    assert!(matches!(err, VoiceError::Signaling { status: 500, .. }));
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_device_failure_closes_peer_and_skips_exchange() {
    let transport = MockTransport::new(vec![ok_json(SESSION_JSON)]);
    let (factory, _events) = MockPeerFactory::new();
    let host = MockInputHost::rejecting_all();

    let mut controller = SessionController::new(
        config(),
        transport.clone(),
        factory.clone(),
        host,
        CollectingSink::new(),
    );
    let err = controller.connect().await.unwrap_err();

    assert!(matches!(err, VoiceError::Device(_)));
    // The description exchange never happened.
    assert_eq!(transport.request_count(), 1);
    // The partially-built peer was torn down.
    assert!(*factory.probe.closed.lock());
    assert_eq!(controller.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_ice_gathering_timeout() {
    let transport = MockTransport::new(vec![ok_json(SESSION_JSON)]);
    let (factory, _events) = MockPeerFactory::with_ice_complete(false);
    let host = MockInputHost::accepting(&["default"]);

    let mut controller = SessionController::new(
        config().with_ice_timeout(Some(Duration::from_secs(15))),
        transport.clone(),
        factory.clone(),
        host,
        CollectingSink::new(),
    );
    let err = controller.connect().await.unwrap_err();

    assert!(matches!(err, VoiceError::Timeout(_)));
    assert_eq!(transport.request_count(), 1);
    assert!(*factory.probe.closed.lock());
    assert_eq!(controller.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_ice_wait_keeps_polling() {
    let transport = MockTransport::new(vec![ok_json(SESSION_JSON)]);
    let (factory, _events) = MockPeerFactory::with_ice_complete(false);
    let host = MockInputHost::accepting(&["default"]);

    let mut controller = SessionController::new(
        config().with_ice_timeout(None),
        transport.clone(),
        factory.clone(),
        host,
        CollectingSink::new(),
    );

    {
        let connect = controller.connect();
        tokio::pin!(connect);
        // With no bound configured, an hour of polling produces neither
        // success nor a timeout error.
        let waited = tokio::time::timeout(Duration::from_secs(3600), connect.as_mut()).await;
        assert!(waited.is_err());
    }

    assert_eq!(controller.state(), SessionState::AwaitingIce);
    // The description exchange never started.
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_connect_is_rejected_when_not_idle() {
    let transport = MockTransport::new(vec![ok_json(SESSION_JSON), ok_sdp("v=0\r\n")]);
    let (factory, _events) = MockPeerFactory::new();
    let host = MockInputHost::accepting(&["default"]);

    let mut controller = SessionController::new(
        config(),
        transport,
        factory,
        host,
        CollectingSink::new(),
    );
    controller.connect().await.unwrap();

    let err = controller.connect().await.unwrap_err();
    assert!(matches!(err, VoiceError::Protocol(_)));
    // A failed re-connect does not tear down the live session.
    assert_eq!(controller.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_run_routes_events_and_plays_remote_audio() {
    let transport = MockTransport::new(vec![ok_json(SESSION_JSON), ok_sdp("v=0\r\n")]);
    let (factory, events) = MockPeerFactory::new();
    let host = MockInputHost::accepting(&["default"]);
    let sink = CollectingSink::new();

    let transcripts = Arc::new(Mutex::new(Vec::new()));
    let transcripts2 = transcripts.clone();
    let callbacks =
        RouterCallbacks::new().on_assistant_delta(move |t| transcripts2.lock().push(t.to_string()));

    let mut controller = SessionController::new(
        config(),
        transport,
        factory.clone(),
        host,
        sink.clone(),
    )
    .with_callbacks(callbacks);
    controller.connect().await.unwrap();

    // Script the peer's event stream, ending with an orderly close.
    let (frame_tx, frame_rx) = mpsc::channel(4);
    frame_tx.send(AudioFrame::pcm16(1, vec![3i16; FRAME_SAMPLES])).await.unwrap();
    drop(frame_tx);

    events.send(PeerEvent::ChannelOpen).await.unwrap();
    events
        .send(PeerEvent::ChannelMessage(
            br#"{"type": "response.audio_transcript.delta", "delta": "hey"}"#.to_vec(),
        ))
        .await
        .unwrap();
    events
        .send(PeerEvent::ChannelMessage(
            br#"{"type": "response.output_item.done", "item": {
                "type": "function_call", "name": "quiet_device",
                "call_id": "call_1", "arguments": "{}"}}"#
                .to_vec(),
        ))
        .await
        .unwrap();
    events.send(PeerEvent::RemoteTrack(RemoteTrack { frames: frame_rx })).await.unwrap();
    events.send(PeerEvent::Closed).await.unwrap();

    controller.run().await.unwrap();
    controller.disconnect().await;
    assert_eq!(controller.state(), SessionState::Closed);

    assert_eq!(&*transcripts.lock(), &["hey".to_string()]);

    // The local function call was answered on the channel: output item
    // followed by a response trigger.
    let mut outbound = factory.probe.outbound.lock().take().unwrap();
    let first: serde_json::Value = serde_json::from_slice(&outbound.try_recv().unwrap()).unwrap();
    assert_eq!(first["type"], "conversation.item.create");
    assert_eq!(first["item"]["call_id"], "call_1");
    let second: serde_json::Value = serde_json::from_slice(&outbound.try_recv().unwrap()).unwrap();
    assert_eq!(second["type"], "response.create");
    assert!(outbound.try_recv().is_err());

    // The remote frame reached the sink before teardown completed.
    let blocks = sink.blocks.lock();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0], vec![3i16; FRAME_SAMPLES]);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let transport = MockTransport::new(vec![ok_json(SESSION_JSON), ok_sdp("v=0\r\n")]);
    let (factory, _events) = MockPeerFactory::new();
    let host = MockInputHost::accepting(&["default"]);

    let mut controller = SessionController::new(
        config(),
        transport,
        factory.clone(),
        host,
        CollectingSink::new(),
    );
    controller.connect().await.unwrap();

    controller.disconnect().await;
    assert_eq!(controller.state(), SessionState::Closed);
    assert!(*factory.probe.closed.lock());

    // A second disconnect is a no-op.
    controller.disconnect().await;
    assert_eq!(controller.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_run_requires_connected_state() {
    let transport = MockTransport::new(vec![]);
    let (factory, _events) = MockPeerFactory::new();
    let host = MockInputHost::accepting(&["default"]);

    let mut controller = SessionController::new(
        config(),
        transport,
        factory,
        host,
        CollectingSink::new(),
    );
    let err = controller.run().await.unwrap_err();
    assert!(matches!(err, VoiceError::NotConnected));
}

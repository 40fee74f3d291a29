//! Shared test doubles for the capability seams.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use realtime_voice::controller::{PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent};
use realtime_voice::device::{AudioInputHost, CaptureTrack, DeviceCandidate};
use realtime_voice::router::ChannelWriter;
use realtime_voice::signaling::{
    SessionDescription, SignalingRequest, SignalingResponse, SignalingTransport,
};
use realtime_voice::{AudioFrame, PlaybackSink, Result, VoiceError};

// ── Signaling ───────────────────────────────────────────────────────────

/// Transport that replays scripted responses and records every request.
pub struct MockTransport {
    pub requests: Mutex<Vec<SignalingRequest>>,
    responses: Mutex<VecDeque<SignalingResponse>>,
}

impl MockTransport {
    pub fn new(responses: Vec<SignalingResponse>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn post(&self, request: SignalingRequest) -> Result<SignalingResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| VoiceError::connection("no scripted response left"))
    }
}

pub fn ok_json(body: &str) -> SignalingResponse {
    SignalingResponse { status: 200, body: body.as_bytes().to_vec() }
}

pub fn ok_sdp(sdp: &str) -> SignalingResponse {
    SignalingResponse { status: 201, body: sdp.as_bytes().to_vec() }
}

pub fn response(status: u16, body: &str) -> SignalingResponse {
    SignalingResponse { status, body: body.as_bytes().to_vec() }
}

// ── Peer connection ─────────────────────────────────────────────────────

/// Shared observable state of a [`MockPeer`], inspectable after the
/// controller has taken ownership of the peer itself.
#[derive(Default)]
pub struct PeerProbe {
    pub ice_servers_seen: Mutex<Option<PeerConfig>>,
    pub track_attached: Mutex<bool>,
    pub offer_created: Mutex<bool>,
    pub answer_applied: Mutex<Option<String>>,
    pub closed: Mutex<bool>,
    pub outbound: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

pub struct MockPeer {
    probe: Arc<PeerProbe>,
    ice_complete: Arc<Mutex<bool>>,
    writer: ChannelWriter,
    events: mpsc::Receiver<PeerEvent>,
}

pub struct MockPeerFactory {
    pub probe: Arc<PeerProbe>,
    /// Flips `ice_gathering_complete` on the created peer.
    pub ice_complete: Arc<Mutex<bool>>,
    events: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
}

impl MockPeerFactory {
    /// A factory whose peer gathers instantly. Returns the factory and the
    /// sender that scripts the peer's event stream.
    pub fn new() -> (Arc<Self>, mpsc::Sender<PeerEvent>) {
        Self::with_ice_complete(true)
    }

    pub fn with_ice_complete(complete: bool) -> (Arc<Self>, mpsc::Sender<PeerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let factory = Arc::new(Self {
            probe: Arc::new(PeerProbe::default()),
            ice_complete: Arc::new(Mutex::new(complete)),
            events: Mutex::new(Some(rx)),
        });
        (factory, tx)
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(&self, config: PeerConfig) -> Result<Box<dyn PeerConnection>> {
        *self.probe.ice_servers_seen.lock() = Some(config);
        let (writer, outbound_rx) = ChannelWriter::pair();
        *self.probe.outbound.lock() = Some(outbound_rx);
        let events = self
            .events
            .lock()
            .take()
            .ok_or_else(|| VoiceError::connection("mock factory already used"))?;
        Ok(Box::new(MockPeer {
            probe: self.probe.clone(),
            ice_complete: self.ice_complete.clone(),
            writer,
            events,
        }))
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_audio_track(&mut self, _frames: mpsc::Receiver<AudioFrame>) -> Result<()> {
        *self.probe.track_attached.lock() = true;
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        *self.probe.offer_created.lock() = true;
        Ok(SessionDescription::offer("v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"))
    }

    fn ice_gathering_complete(&self) -> bool {
        *self.ice_complete.lock()
    }

    async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<()> {
        *self.probe.answer_applied.lock() = Some(answer.sdp.clone());
        Ok(())
    }

    fn channel_writer(&self) -> ChannelWriter {
        self.writer.clone()
    }

    async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        *self.probe.closed.lock() = true;
    }
}

// ── Audio input ─────────────────────────────────────────────────────────

/// Input host that opens only the named devices and records every attempt.
pub struct MockInputHost {
    accepts: Vec<String>,
    pub attempts: Mutex<Vec<DeviceCandidate>>,
}

impl MockInputHost {
    pub fn accepting(devices: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            accepts: devices.iter().map(|d| d.to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting_all() -> Arc<Self> {
        Self::accepting(&[])
    }
}

#[async_trait]
impl AudioInputHost for MockInputHost {
    async fn open(&self, candidate: &DeviceCandidate) -> Result<CaptureTrack> {
        self.attempts.lock().push(candidate.clone());
        if self.accepts.iter().any(|d| d == &candidate.device) {
            let (_tx, rx) = mpsc::channel(1);
            Ok(CaptureTrack { candidate: candidate.clone(), frames: rx })
        } else {
            Err(VoiceError::device(format!("{} unavailable", candidate.device)))
        }
    }
}

// ── Playback ────────────────────────────────────────────────────────────

/// Sink collecting every written block.
#[derive(Default)]
pub struct CollectingSink {
    pub blocks: Mutex<Vec<Vec<i16>>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PlaybackSink for CollectingSink {
    fn write(&self, pcm: &[i16]) -> Result<()> {
        self.blocks.lock().push(pcm.to_vec());
        Ok(())
    }
}

//! Sans-IO WebRTC peer connection built on `str0m`.
//!
//! The module includes:
//! - [`OpusCodec`] — Opus encoder/decoder wrapping `audiopus` for PCM16 ↔ Opus conversion.
//! - [`Str0mPeerFactory`] / [`Str0mPeer`] — [`PeerConnection`] implementation
//!   whose I/O (UDP, timers, media pacing) is driven by a background task.

use std::convert::TryFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use audiopus::coder::{Decoder, Encoder};
use audiopus::{Application, Channels, MutSignals, SampleRate};
use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::channel::ChannelId;
use str0m::media::{Direction, Frequency, MediaKind, MediaTime, Mid, Pt};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE};
use crate::controller::{PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent};
use crate::error::{Result, VoiceError};
use crate::playback::RemoteTrack;
use crate::router::ChannelWriter;
use crate::signaling::SessionDescription;

/// Label of the WebRTC data channel carrying JSON events. The service
/// expects "messages"; it is matched by label, not negotiated.
const DATA_CHANNEL_LABEL: &str = "messages";

/// Maximum size of an encoded Opus frame in bytes. Opus frames are much
/// smaller than this in practice; a generous buffer avoids truncation.
const MAX_OPUS_FRAME_BYTES: usize = 4000;

/// Maximum number of decoded samples per channel per frame (120 ms at
/// 48 kHz, the longest legal Opus frame).
const MAX_DECODED_SAMPLES_PER_CHANNEL: usize = 5760;

/// Cap on messages queued before the data channel opens.
const MAX_PENDING_DC_MESSAGES: usize = 50;

// ── Opus codec ──────────────────────────────────────────────────────────

/// Opus codec for encoding PCM16 to Opus and decoding Opus to PCM16.
///
/// Wraps `audiopus` encoder and decoder, configured for a specific sample
/// rate and channel count. Used by the peer driver to transcode between
/// the protocol's PCM16 format and the Opus frames on the media track.
pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
    channels: Channels,
}

impl OpusCodec {
    /// Creates a codec for the given sample rate and channel count.
    ///
    /// The encoder uses VoIP application mode, optimized for speech and
    /// low latency.
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        let sample_rate = SampleRate::try_from(sample_rate as i32)
            .map_err(|e| VoiceError::connection(format!("invalid sample rate {sample_rate}: {e}")))?;

        let channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(VoiceError::connection(format!(
                    "invalid channel count {other}: must be 1 (mono) or 2 (stereo)"
                )));
            }
        };

        let encoder = Encoder::new(sample_rate, channels, Application::Voip)
            .map_err(|e| VoiceError::connection(format!("failed to create Opus encoder: {e}")))?;
        let decoder = Decoder::new(sample_rate, channels)
            .map_err(|e| VoiceError::connection(format!("failed to create Opus decoder: {e}")))?;

        Ok(Self { encoder, decoder, channels })
    }

    /// Encode one frame of PCM16 samples.
    ///
    /// The input length must be a valid Opus frame size for the configured
    /// rate (at 24 kHz mono: 120, 240, 480, 960, 1920, or 2880 samples).
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; MAX_OPUS_FRAME_BYTES];
        let encoded_len = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| VoiceError::connection(format!("Opus encode failed: {e}")))?;
        output.truncate(encoded_len);
        Ok(output)
    }

    /// Decode one Opus frame to PCM16 at the configured rate.
    pub fn decode(&mut self, opus_data: &[u8]) -> Result<Vec<i16>> {
        let channel_count = match self.channels {
            Channels::Mono => 1,
            Channels::Stereo => 2,
            _ => 1,
        };
        let mut output = vec![0i16; MAX_DECODED_SAMPLES_PER_CHANNEL * channel_count];

        let packet = audiopus::packet::Packet::try_from(opus_data)
            .map_err(|e| VoiceError::connection(format!("invalid Opus packet: {e}")))?;
        let signals = MutSignals::try_from(output.as_mut_slice())
            .map_err(|e| VoiceError::connection(format!("failed to create output buffer: {e}")))?;

        let decoded = self
            .decoder
            .decode(Some(packet), signals, false)
            .map_err(|e| VoiceError::connection(format!("Opus decode failed: {e}")))?;

        output.truncate(decoded * channel_count);
        Ok(output)
    }
}

// ── Factory ─────────────────────────────────────────────────────────────

/// Creates [`Str0mPeer`] connections bound to an ephemeral UDP socket.
#[derive(Debug, Default)]
pub struct Str0mPeerFactory;

impl Str0mPeerFactory {
    /// Create the factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for Str0mPeerFactory {
    async fn create(&self, config: PeerConfig) -> Result<Box<dyn PeerConnection>> {
        // Host candidates only: the socket's own address is offered
        // directly, so server-reflexive gathering via the configured ICE
        // servers is not performed.
        if !config.ice_servers.is_empty() {
            debug!(
                ice_servers = config.ice_servers.len(),
                "ICE servers configured; connecting with host candidates"
            );
        }

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| VoiceError::connection(format!("failed to bind media socket: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| VoiceError::connection(e.to_string()))?;

        let (writer, outbound_rx) = ChannelWriter::pair();
        let (event_tx, event_rx) = mpsc::channel(100);
        let (close_tx, close_rx) = mpsc::channel(1);

        Ok(Box::new(Str0mPeer {
            rtc: Some(Rtc::new(Instant::now())),
            socket: Some(socket),
            local_addr,
            audio_mid: None,
            channel_id: None,
            pending: None,
            capture_rx: None,
            ice_complete: false,
            writer,
            outbound_rx: Some(outbound_rx),
            event_tx: Some(event_tx),
            event_rx,
            close_tx,
            close_rx: Some(close_rx),
        }))
    }
}

// ── Peer ────────────────────────────────────────────────────────────────

/// A peer connection over `str0m`. Before [`PeerConnection::apply_answer`]
/// the `Rtc` state machine lives on the struct; afterwards it moves into
/// the driver task and the struct only relays events and the close signal.
pub struct Str0mPeer {
    rtc: Option<Rtc>,
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    audio_mid: Option<Mid>,
    channel_id: Option<ChannelId>,
    pending: Option<SdpPendingOffer>,
    capture_rx: Option<mpsc::Receiver<AudioFrame>>,
    ice_complete: bool,
    writer: ChannelWriter,
    outbound_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    event_tx: Option<mpsc::Sender<PeerEvent>>,
    event_rx: mpsc::Receiver<PeerEvent>,
    close_tx: mpsc::Sender<()>,
    close_rx: Option<mpsc::Receiver<()>>,
}

impl Str0mPeer {
    fn rtc_mut(&mut self) -> Result<&mut Rtc> {
        self.rtc
            .as_mut()
            .ok_or_else(|| VoiceError::connection("peer connection already negotiated"))
    }
}

#[async_trait]
impl PeerConnection for Str0mPeer {
    async fn add_audio_track(&mut self, frames: mpsc::Receiver<AudioFrame>) -> Result<()> {
        self.capture_rx = Some(frames);
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        let local_addr = self.local_addr;
        let rtc = self.rtc_mut()?;

        // str0m performs no gathering of its own: the socket's address is
        // added as a host candidate so the offer carries it, and gathering
        // is complete by construction.
        let candidate = Candidate::host(local_addr, "udp")
            .map_err(|e| VoiceError::connection(format!("failed to create host candidate: {e}")))?;
        rtc.add_local_candidate(candidate);

        let mut changes = rtc.sdp_api();
        let audio_mid = changes.add_media(MediaKind::Audio, Direction::SendRecv, None, None, None);
        let channel_id = changes.add_channel(DATA_CHANNEL_LABEL.to_string());
        let (offer, pending) = changes
            .apply()
            .ok_or_else(|| VoiceError::connection("failed to generate offer: no changes to apply"))?;

        self.audio_mid = Some(audio_mid);
        self.channel_id = Some(channel_id);
        self.pending = Some(pending);
        self.ice_complete = true;

        debug!(mid = %audio_mid, "local offer generated");
        Ok(SessionDescription::offer(offer.to_sdp_string()))
    }

    fn ice_gathering_complete(&self) -> bool {
        self.ice_complete
    }

    async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| VoiceError::connection("no pending offer to answer"))?;
        let parsed = SdpAnswer::from_sdp_string(&answer.sdp)
            .map_err(|e| VoiceError::protocol(format!("failed to parse answer: {e}")))?;

        let audio_mid = self
            .audio_mid
            .ok_or_else(|| VoiceError::connection("no audio track negotiated"))?;
        let channel_id = self
            .channel_id
            .ok_or_else(|| VoiceError::connection("no data channel negotiated"))?;

        let mut rtc = self
            .rtc
            .take()
            .ok_or_else(|| VoiceError::connection("peer connection already negotiated"))?;
        rtc.sdp_api()
            .accept_answer(pending, parsed)
            .map_err(|e| VoiceError::protocol(format!("failed to apply answer: {e}")))?;

        // Opus payload type and clock rate come from the negotiated SDP;
        // Opus is the only audio codec offered.
        let (opus_pt, clock_rate) = {
            let writer = rtc
                .writer(audio_mid)
                .ok_or_else(|| VoiceError::connection("audio writer not available after answer"))?;
            let params = writer
                .payload_params()
                .next()
                .ok_or_else(|| VoiceError::protocol("no payload type negotiated for audio"))?;
            (params.pt(), params.spec().clock_rate)
        };

        let driver = PeerDriver {
            rtc,
            socket: self
                .socket
                .take()
                .ok_or_else(|| VoiceError::connection("media socket already taken"))?,
            local_addr: self.local_addr,
            audio_mid,
            channel_id,
            opus_pt,
            clock_rate,
            codec: OpusCodec::new(SAMPLE_RATE, 1)?,
            capture_rx: self.capture_rx.take(),
            outbound_rx: self
                .outbound_rx
                .take()
                .ok_or_else(|| VoiceError::connection("outbound channel already taken"))?,
            event_tx: self
                .event_tx
                .take()
                .ok_or_else(|| VoiceError::connection("event channel already taken"))?,
            close_rx: self
                .close_rx
                .take()
                .ok_or_else(|| VoiceError::connection("close channel already taken"))?,
        };
        tokio::spawn(driver.run());

        info!(mid = %audio_mid, "answer applied, peer driver started");
        Ok(())
    }

    fn channel_writer(&self) -> ChannelWriter {
        self.writer.clone()
    }

    async fn next_event(&mut self) -> Option<PeerEvent> {
        self.event_rx.recv().await
    }

    async fn close(&mut self) {
        let _ = self.close_tx.send(()).await;
    }
}

// ── Driver ──────────────────────────────────────────────────────────────

/// Owns the sans-IO state machine after negotiation and drives its three
/// duties: UDP I/O and timers, outbound media pacing, and event delivery.
struct PeerDriver {
    rtc: Rtc,
    socket: UdpSocket,
    local_addr: SocketAddr,
    audio_mid: Mid,
    channel_id: ChannelId,
    opus_pt: Pt,
    clock_rate: Frequency,
    codec: OpusCodec,
    capture_rx: Option<mpsc::Receiver<AudioFrame>>,
    outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    event_tx: mpsc::Sender<PeerEvent>,
    close_rx: mpsc::Receiver<()>,
}

impl PeerDriver {
    async fn run(mut self) {
        let mut net_buf = vec![0u8; 2000];
        let mut pcm_buffer: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 4);
        let mut rtp_offset: u64 = 0;

        let mut dc_open = false;
        let mut pending_dc: Vec<Vec<u8>> = Vec::new();
        let mut remote_tx: Option<mpsc::Sender<AudioFrame>> = None;
        let mut outbound_open = true;

        info!("peer driver loop started");

        loop {
            // Drain the state machine before waiting on I/O.
            let deadline = loop {
                match self.rtc.poll_output() {
                    Ok(Output::Transmit(t)) => {
                        if let Err(e) = self.socket.send_to(&t.contents, t.destination).await {
                            warn!(error = %e, "UDP send failed");
                        }
                    }
                    Ok(Output::Event(event)) => match event {
                        Event::Connected => {
                            info!("peer connected");
                        }
                        Event::ChannelOpen(id, label) => {
                            if id == self.channel_id {
                                info!(%label, queued = pending_dc.len(), "data channel open");
                                dc_open = true;
                                for msg in pending_dc.drain(..) {
                                    self.write_channel(&msg);
                                }
                                let _ = self.event_tx.send(PeerEvent::ChannelOpen).await;
                            }
                        }
                        Event::ChannelData(data) => {
                            if data.id == self.channel_id {
                                let _ = self
                                    .event_tx
                                    .send(PeerEvent::ChannelMessage(data.data))
                                    .await;
                            }
                        }
                        Event::MediaData(media) => {
                            if media.mid == self.audio_mid {
                                self.deliver_media(&media.data, &mut remote_tx).await;
                            }
                        }
                        Event::IceConnectionStateChange(state) => {
                            debug!(?state, "ICE connection state");
                        }
                        _ => {}
                    },
                    Ok(Output::Timeout(deadline)) => break deadline,
                    Err(e) => {
                        warn!(error = %e, "peer state machine failed");
                        let _ = self.event_tx.send(PeerEvent::Closed).await;
                        return;
                    }
                }
            };

            if !self.rtc.is_alive() {
                let _ = self.event_tx.send(PeerEvent::Closed).await;
                return;
            }

            let sleep = deadline.saturating_duration_since(Instant::now());

            tokio::select! {
                biased;

                _ = self.close_rx.recv() => {
                    debug!("peer close requested");
                    self.rtc.disconnect();
                }

                msg = self.outbound_rx.recv(), if outbound_open => {
                    match msg {
                        Some(bytes) => {
                            if dc_open {
                                self.write_channel(&bytes);
                            } else if pending_dc.len() < MAX_PENDING_DC_MESSAGES {
                                debug!(queued = pending_dc.len() + 1,
                                    "data channel not open, queuing message");
                                pending_dc.push(bytes);
                            } else {
                                warn!("outbound message queue full, dropping message");
                            }
                        }
                        None => outbound_open = false,
                    }
                }

                frame = recv_capture(&mut self.capture_rx), if self.capture_rx.is_some() => {
                    match frame {
                        Some(frame) => {
                            pcm_buffer.extend_from_slice(&frame.mono_pcm16());
                            self.send_buffered_audio(&mut pcm_buffer, &mut rtp_offset);
                        }
                        None => {
                            debug!("microphone capture ended");
                            self.capture_rx = None;
                        }
                    }
                }

                received = self.socket.recv_from(&mut net_buf) => {
                    if let Ok((n, source)) = received {
                        match Receive::new(
                            Protocol::Udp,
                            source,
                            self.local_addr,
                            &net_buf[..n],
                        ) {
                            Ok(receive) => {
                                if let Err(e) = self
                                    .rtc
                                    .handle_input(Input::Receive(Instant::now(), receive))
                                {
                                    warn!(error = %e, "failed to handle inbound packet");
                                }
                            }
                            Err(e) => debug!(error = %e, "ignoring unparseable packet"),
                        }
                    }
                }

                _ = tokio::time::sleep(sleep) => {
                    if let Err(e) = self.rtc.handle_input(Input::Timeout(Instant::now())) {
                        warn!(error = %e, "failed to handle timeout");
                    }
                }
            }
        }
    }

    fn write_channel(&mut self, bytes: &[u8]) {
        match self.rtc.channel(self.channel_id) {
            Some(mut channel) => {
                if let Err(e) = channel.write(true, bytes) {
                    warn!(error = %e, "data channel write failed");
                }
            }
            None => warn!("data channel not available for write"),
        }
    }

    /// Encode and send every full 20 ms frame buffered so far. The RTP
    /// clock advances by the frame's duration at the negotiated rate
    /// (48 kHz for Opus per RFC 7587, regardless of the input rate).
    fn send_buffered_audio(&mut self, pcm_buffer: &mut Vec<i16>, rtp_offset: &mut u64) {
        while pcm_buffer.len() >= FRAME_SAMPLES {
            let frame: Vec<i16> = pcm_buffer.drain(..FRAME_SAMPLES).collect();
            let opus = match self.codec.encode(&frame) {
                Ok(opus) => opus,
                Err(e) => {
                    warn!(error = %e, "Opus encode failed, dropping frame");
                    continue;
                }
            };

            let clock_hz = self.clock_rate.get() as u64;
            let rtp_time = MediaTime::new(*rtp_offset, self.clock_rate);
            *rtp_offset += FRAME_SAMPLES as u64 * clock_hz / SAMPLE_RATE as u64;

            match self.rtc.writer(self.audio_mid) {
                Some(writer) => {
                    if let Err(e) = writer.write(self.opus_pt, Instant::now(), rtp_time, opus) {
                        warn!(error = %e, "audio track write failed");
                    }
                }
                None => warn!("audio writer not available"),
            }
        }
    }

    /// Decode one inbound Opus frame and push it to the remote track,
    /// announcing the track on the first frame.
    async fn deliver_media(
        &mut self,
        opus_data: &[u8],
        remote_tx: &mut Option<mpsc::Sender<AudioFrame>>,
    ) {
        let pcm = match self.codec.decode(opus_data) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(error = %e, "Opus decode failed, dropping frame");
                return;
            }
        };

        if remote_tx.is_none() {
            let (tx, rx) = mpsc::channel(100);
            if self
                .event_tx
                .send(PeerEvent::RemoteTrack(RemoteTrack { frames: rx }))
                .await
                .is_err()
            {
                return;
            }
            *remote_tx = Some(tx);
        }

        if let Some(tx) = remote_tx {
            // Never stall the I/O loop on a slow consumer.
            if tx.try_send(AudioFrame::pcm16(1, pcm)).is_err() {
                warn!("playback queue full, dropping frame");
            }
        }
    }
}

async fn recv_capture(rx: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

//! Session lifecycle orchestration.
//!
//! [`SessionController`] drives the session through its states: signaling,
//! device selection, connectivity negotiation, then the connected event
//! loop. The transport, peer connection, microphone, and speaker are all
//! capability traits so the full lifecycle is testable without hardware or
//! a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::AudioFrame;
use crate::device::{AudioInputHost, select_input};
use crate::error::{Result, VoiceError};
use crate::playback::{PlaybackSink, PlaybackWorker, RemoteTrack};
use crate::router::{ChannelWriter, EventRouter, LocalFunctionTable, RouterCallbacks};
use crate::signaling::{
    IceServer, SessionDescription, SignalingExchange, SignalingTransport,
};

/// Default signaling endpoint.
pub const DEFAULT_SERVER_URL: &str = "https://api.itannix.com";

/// Default bound on candidate gathering.
pub const DEFAULT_ICE_TIMEOUT: Duration = Duration::from_secs(15);

const ICE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Configuration ───────────────────────────────────────────────────────

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Client identifier sent with every signaling request.
    pub client_id: String,
    /// Client secret sent with every signaling request.
    pub client_secret: String,
    /// Signaling server base URL.
    pub server_url: String,
    /// Explicit audio input specifier. `None` selects from the platform
    /// default table.
    pub device: Option<String>,
    /// Bound on candidate gathering. `None` waits indefinitely.
    pub ice_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Configuration with defaults for everything but the credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            device: None,
            ice_timeout: Some(DEFAULT_ICE_TIMEOUT),
        }
    }

    /// Override the server URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Request a specific audio input device.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Override the candidate-gathering bound. `None` disables it.
    pub fn with_ice_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ice_timeout = timeout;
        self
    }
}

// ── Peer connection seam ────────────────────────────────────────────────

/// Transport-level configuration handed to the peer connection.
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    /// ICE servers from session creation, passed through verbatim.
    pub ice_servers: Vec<IceServer>,
}

/// Event emitted by a running peer connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// The data channel opened.
    ChannelOpen,
    /// A complete message arrived on the data channel.
    ChannelMessage(Vec<u8>),
    /// A remote audio track started.
    RemoteTrack(RemoteTrack),
    /// The connection closed or failed.
    Closed,
}

/// A peer connection under negotiation or established.
#[async_trait]
pub trait PeerConnection: Send {
    /// Attach the local microphone track before the offer is created.
    async fn add_audio_track(&mut self, frames: mpsc::Receiver<AudioFrame>) -> Result<()>;

    /// Produce the local offer and start candidate gathering.
    async fn create_offer(&mut self) -> Result<SessionDescription>;

    /// Whether candidate gathering has completed.
    fn ice_gathering_complete(&self) -> bool;

    /// Apply the remote answer and start connecting.
    async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<()>;

    /// Writer onto the outbound data channel. Messages written before the
    /// channel opens are queued and flushed on open.
    fn channel_writer(&self) -> ChannelWriter;

    /// Next connection event. `None` means the connection is gone.
    async fn next_event(&mut self) -> Option<PeerEvent>;

    /// Tear the connection down. Idempotent.
    async fn close(&mut self);
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a fresh, unnegotiated connection.
    async fn create(&self, config: PeerConfig) -> Result<Box<dyn PeerConnection>>;
}

// ── Waiting ─────────────────────────────────────────────────────────────

/// Poll `cond` until it holds, the deadline passes, or the future is
/// dropped. A `None` deadline waits indefinitely.
pub async fn wait_until(
    mut cond: impl FnMut() -> bool,
    poll: Duration,
    deadline: Option<Duration>,
    what: &str,
) -> Result<()> {
    let wait = async {
        while !cond() {
            tokio::time::sleep(poll).await;
        }
    };
    match deadline {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| VoiceError::timeout(format!("timed out waiting for {what}"))),
        None => {
            wait.await;
            Ok(())
        }
    }
}

// ── Controller ──────────────────────────────────────────────────────────

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet connected.
    Idle,
    /// Session creation and local setup in progress.
    Negotiating,
    /// Waiting for candidate gathering.
    AwaitingIce,
    /// Trading the local offer for the remote answer.
    Exchanging,
    /// Media and data flowing.
    Connected,
    /// Teardown in progress.
    Disconnecting,
    /// Torn down; terminal.
    Closed,
}

/// Owns one voice session from connect to teardown.
pub struct SessionController {
    config: SessionConfig,
    signaling: SignalingExchange,
    factory: Arc<dyn PeerConnectionFactory>,
    input_host: Arc<dyn AudioInputHost>,
    sink: Arc<dyn PlaybackSink>,
    callbacks: RouterCallbacks,
    table: LocalFunctionTable,
    state: SessionState,
    session_id: Option<String>,
    peer: Option<Box<dyn PeerConnection>>,
    router: Option<EventRouter>,
    playback: Vec<PlaybackWorker>,
}

impl SessionController {
    /// Build a controller over the given capabilities.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        factory: Arc<dyn PeerConnectionFactory>,
        input_host: Arc<dyn AudioInputHost>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        let signaling = SignalingExchange::new(
            transport,
            config.client_id.clone(),
            config.client_secret.clone(),
            config.server_url.clone(),
        );
        Self {
            config,
            signaling,
            factory,
            input_host,
            sink,
            callbacks: RouterCallbacks::new(),
            table: LocalFunctionTable::default(),
            state: SessionState::Idle,
            session_id: None,
            peer: None,
            router: None,
            playback: Vec::new(),
        }
    }

    /// Install application callbacks. Takes effect on the next connect.
    pub fn with_callbacks(mut self, callbacks: RouterCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Replace the locally-served function table.
    pub fn with_functions(mut self, table: LocalFunctionTable) -> Self {
        self.table = table;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identifier of the negotiated session, once created.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn peer_mut(&mut self) -> Result<&mut Box<dyn PeerConnection>> {
        self.peer.as_mut().ok_or(VoiceError::NotConnected)
    }

    /// Establish the session: signaling, device selection, negotiation.
    /// On any failure the partially-built connection is closed and the
    /// controller ends in [`SessionState::Closed`].
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(VoiceError::protocol(format!(
                "connect is only valid from Idle, not {:?}",
                self.state
            )));
        }
        match self.try_connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn try_connect(&mut self) -> Result<()> {
        self.state = SessionState::Negotiating;
        let session = self.signaling.create_session().await?;
        info!(session_id = %session.id, "session created");
        self.session_id = Some(session.id);

        let peer = self
            .factory
            .create(PeerConfig { ice_servers: session.ice_servers })
            .await?;
        // Held on self from here on so teardown can close it.
        self.peer = Some(peer);

        let track = select_input(self.input_host.as_ref(), self.config.device.as_deref()).await?;
        debug!(device = %track.candidate, "microphone attached");
        self.peer_mut()?.add_audio_track(track.frames).await?;

        let offer = self.peer_mut()?.create_offer().await?;

        self.state = SessionState::AwaitingIce;
        let timeout = self.config.ice_timeout;
        {
            let peer = self.peer_mut()?;
            wait_until(
                || peer.ice_gathering_complete(),
                ICE_POLL_INTERVAL,
                timeout,
                "candidate gathering",
            )
            .await?;
        }

        self.state = SessionState::Exchanging;
        let answer = self.signaling.exchange_description(&offer).await?;
        self.peer_mut()?.apply_answer(&answer).await?;

        let writer = self.peer_mut()?.channel_writer();
        self.router = Some(EventRouter::new(
            std::mem::take(&mut self.table),
            self.callbacks.clone(),
            writer,
        ));

        self.state = SessionState::Connected;
        info!("session connected");
        Ok(())
    }

    /// Drive the connected session until the peer closes. Returns `Ok` on
    /// orderly close; call [`SessionController::disconnect`] afterwards.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(VoiceError::NotConnected);
        }
        loop {
            let event = match self.peer.as_mut() {
                Some(peer) => peer.next_event().await,
                None => return Err(VoiceError::NotConnected),
            };
            match event {
                Some(PeerEvent::ChannelOpen) => {
                    debug!("data channel open");
                }
                Some(PeerEvent::ChannelMessage(bytes)) => {
                    if let Some(router) = &self.router {
                        router.handle_raw(&bytes);
                    }
                }
                Some(PeerEvent::RemoteTrack(track)) => {
                    info!("remote audio track started");
                    self.playback
                        .push(PlaybackWorker::spawn(track, self.sink.clone()));
                }
                Some(PeerEvent::Closed) | None => {
                    info!("peer connection closed");
                    return Ok(());
                }
            }
        }
    }

    /// Tear the session down. Safe to call in any state; repeated calls
    /// are no-ops.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Disconnecting;
        self.teardown().await;
        info!("session closed");
    }

    async fn teardown(&mut self) {
        // Playback loops stop before the connection so no worker writes
        // to a sink after its track's source is gone.
        for worker in self.playback.drain(..) {
            worker.stop().await;
        }
        self.router = None;
        if let Some(mut peer) = self.peer.take() {
            peer.close().await;
        }
        self.state = SessionState::Closed;
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out() {
        let result = wait_until(
            || false,
            Duration::from_millis(100),
            Some(Duration::from_secs(15)),
            "candidate gathering",
        )
        .await;
        assert!(matches!(result, Err(VoiceError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_sees_late_condition() {
        let polls = AtomicU32::new(0);
        let result = wait_until(
            || polls.fetch_add(1, Ordering::SeqCst) >= 3,
            Duration::from_millis(100),
            Some(Duration::from_secs(15)),
            "condition",
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_until_immediate_condition_without_deadline() {
        // Unbounded wait returns as soon as the condition holds.
        let result = wait_until(|| true, Duration::from_millis(100), None, "x").await;
        assert!(result.is_ok());
    }
}

//! # realtime-voice
//!
//! Realtime voice session client: WebRTC-based bidirectional audio with a
//! JSON event channel, driven by a session controller.
//!
//! ## Architecture
//!
//! ```text
//!   ┌─────────────────────────────────────────────────────┐
//!   │                  SessionController                  │
//!   │   connect → negotiate → run event loop → teardown   │
//!   └───────┬──────────────┬──────────────┬───────────────┘
//!           │              │              │
//!   ┌───────▼──────┐ ┌─────▼───────┐ ┌────▼────────────┐
//!   │  Signaling   │ │ EventRouter │ │ PlaybackWorkers │
//!   │  Exchange    │ │ (data chan) │ │ (remote audio)  │
//!   └──────────────┘ └─────────────┘ └─────────────────┘
//! ```
//!
//! The transports are capability traits: [`signaling::SignalingTransport`]
//! for the HTTP exchange, [`controller::PeerConnectionFactory`] for the
//! peer connection, [`device::AudioInputHost`] for the microphone, and
//! [`playback::PlaybackSink`] for the speaker. Production implementations
//! live behind feature flags (`webrtc` for the `str0m`-based peer,
//! `desktop-audio` for `cpal` capture/playback); the core state machine
//! and router build with no features and are fully testable with mocks.
//!
//! ## Features
//!
//! - **Session lifecycle**: create session, negotiate, drive, tear down
//! - **Event routing**: transcripts to callbacks, function calls answered
//!   locally or delegated to the application
//! - **Audio pipeline**: Opus over the media track, PCM16 normalization,
//!   per-track playback workers
//!
//! ## Example
//!
//! ```rust,ignore
//! use realtime_voice::{SessionConfig, SessionController, RouterCallbacks};
//!
//! let config = SessionConfig::new(client_id, client_secret);
//! let mut controller = SessionController::new(config, transport, factory, mic, speaker)
//!     .with_callbacks(RouterCallbacks::new()
//!         .on_assistant_delta(|text| print!("{text}")));
//!
//! controller.connect().await?;
//! controller.run().await?;
//! controller.disconnect().await;
//! ```

pub mod audio;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod playback;
pub mod router;
pub mod signaling;

#[cfg(feature = "desktop-audio")]
pub mod audio_io;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use audio::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE};
pub use controller::{
    DEFAULT_SERVER_URL, PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent,
    SessionConfig, SessionController, SessionState,
};
pub use device::{AudioInputHost, CaptureTrack, DeviceCandidate, PlatformFormat};
pub use error::{Result, VoiceError};
pub use events::{ClientEvent, FunctionCallRequest, ServerEvent};
pub use playback::{NullSink, PlaybackSink, RemoteTrack};
pub use router::{ChannelWriter, EventRouter, LocalFunctionTable, RouterCallbacks};
pub use signaling::{
    HttpSignalingTransport, IceServer, Session, SessionDescription, SignalingExchange,
    SignalingTransport,
};

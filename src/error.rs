//! Error types for the voice session client.

use thiserror::Error;

/// Result type for voice session operations.
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Errors that can occur while negotiating or running a voice session.
///
/// Signaling and device errors abort connection setup and surface to the
/// caller of `connect()`. Protocol decode failures and per-frame playback
/// failures are recovered locally and never reach this type.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// A signaling call returned a non-success status.
    #[error("signaling failed with status {status}: {body}")]
    Signaling {
        /// HTTP status code from the signaling endpoint.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// No usable audio input, or an explicitly requested device failed.
    #[error("audio device error: {0}")]
    Device(String),

    /// Transport-level failure (HTTP, UDP, peer connection).
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed protocol data that cannot be recovered in place.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait expired.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operation requires a connected session.
    #[error("session not connected")]
    NotConnected,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Create a new signaling error.
    pub fn signaling(status: u16, body: impl Into<String>) -> Self {
        Self::Signaling { status, body: body.into() }
    }

    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }
}

//! Audio input device selection.
//!
//! Candidates are data, not control flow: an ordered table of
//! (device, platform format) pairs is tried until one opens. An explicit
//! specifier is mapped to exactly one candidate whose failure is fatal —
//! explicit intent is never silently overridden.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::AudioFrame;
use crate::error::{Result, VoiceError};

/// Platform capture backend family a device specifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFormat {
    /// PulseAudio (Linux, preferred).
    Pulse,
    /// ALSA (Linux fallback).
    Alsa,
    /// AVFoundation (macOS), specifiers like `":1"`.
    AvFoundation,
    /// DirectShow (Windows), specifiers like `"audio=Microphone"`.
    DirectShow,
}

impl std::fmt::Display for PlatformFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pulse => write!(f, "pulse"),
            Self::Alsa => write!(f, "alsa"),
            Self::AvFoundation => write!(f, "avfoundation"),
            Self::DirectShow => write!(f, "dshow"),
        }
    }
}

/// One (device specifier, platform format) pair to attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Device specifier in the platform format's syntax.
    pub device: String,
    /// Capture backend to open it with.
    pub format: PlatformFormat,
}

impl DeviceCandidate {
    /// Create a candidate.
    pub fn new(device: impl Into<String>, format: PlatformFormat) -> Self {
        Self { device: device.into(), format }
    }
}

impl std::fmt::Display for DeviceCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.device, self.format)
    }
}

/// Map an explicit device specifier to its one candidate.
///
/// A leading `:` is AVFoundation syntax, an `audio=` prefix is DirectShow
/// syntax, anything else is assumed to name a Linux device.
pub fn infer_candidate(spec: &str) -> DeviceCandidate {
    if spec.starts_with(':') {
        DeviceCandidate::new(spec, PlatformFormat::AvFoundation)
    } else if spec.starts_with("audio=") {
        DeviceCandidate::new(spec, PlatformFormat::DirectShow)
    } else {
        DeviceCandidate::new(spec, PlatformFormat::Pulse)
    }
}

/// Ordered fallback table covering the common default configuration of each
/// platform family. Tried in order, short-circuiting on first success.
pub fn default_candidates() -> Vec<DeviceCandidate> {
    vec![
        DeviceCandidate::new("default", PlatformFormat::Pulse),
        DeviceCandidate::new("default", PlatformFormat::Alsa),
        DeviceCandidate::new(":default", PlatformFormat::AvFoundation),
        DeviceCandidate::new("audio=default", PlatformFormat::DirectShow),
    ]
}

/// An opened microphone: the winning candidate plus its captured frames at
/// the protocol rate (24 kHz mono).
#[derive(Debug)]
pub struct CaptureTrack {
    /// The candidate that opened successfully.
    pub candidate: DeviceCandidate,
    /// Captured audio frames. The channel closes when capture stops.
    pub frames: mpsc::Receiver<AudioFrame>,
}

/// Device capability: turn a candidate into an attached capture track.
#[async_trait]
pub trait AudioInputHost: Send + Sync {
    /// Open the candidate, or fail with a [`VoiceError::Device`] naming why.
    async fn open(&self, candidate: &DeviceCandidate) -> Result<CaptureTrack>;
}

/// Select a usable input track.
///
/// With an explicit specifier, exactly one candidate is attempted and any
/// failure is fatal with device context. Without one, the default table is
/// folded to the first success; exhaustion fails with every attempt's
/// reason in the diagnostic.
pub async fn select_input(
    host: &dyn AudioInputHost,
    explicit: Option<&str>,
) -> Result<CaptureTrack> {
    if let Some(spec) = explicit {
        let candidate = infer_candidate(spec);
        return match host.open(&candidate).await {
            Ok(track) => {
                info!(device = %candidate, "using requested audio input");
                Ok(track)
            }
            Err(e) => Err(VoiceError::device(format!(
                "requested audio device {candidate} could not be opened: {e}"
            ))),
        };
    }

    let mut failures = Vec::new();
    for candidate in default_candidates() {
        match host.open(&candidate).await {
            Ok(track) => {
                info!(device = %candidate, "using audio input");
                return Ok(track);
            }
            Err(e) => {
                warn!(device = %candidate, error = %e, "audio input candidate failed");
                failures.push(format!("{candidate}: {e}"));
            }
        }
    }

    Err(VoiceError::device(format!(
        "no usable microphone found; attempted: {}",
        failures.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_colon_is_avfoundation() {
        let candidate = infer_candidate(":1");
        assert_eq!(candidate.format, PlatformFormat::AvFoundation);
        assert_eq!(candidate.device, ":1");
    }

    #[test]
    fn test_audio_prefix_is_dshow() {
        let candidate = infer_candidate("audio=Microphone (USB)");
        assert_eq!(candidate.format, PlatformFormat::DirectShow);
    }

    #[test]
    fn test_plain_name_is_linux_family() {
        let candidate = infer_candidate("hw:0,0");
        assert_eq!(candidate.format, PlatformFormat::Pulse);
    }

    #[test]
    fn test_default_table_order() {
        let formats: Vec<_> = default_candidates().into_iter().map(|c| c.format).collect();
        assert_eq!(
            formats,
            vec![
                PlatformFormat::Pulse,
                PlatformFormat::Alsa,
                PlatformFormat::AvFoundation,
                PlatformFormat::DirectShow,
            ]
        );
    }
}

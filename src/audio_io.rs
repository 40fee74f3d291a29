//! Desktop audio capture and playback via `cpal`.
//!
//! cpal streams are not `Send`, so each stream is owned by a dedicated
//! thread that builds it, plays it, and blocks on a shutdown signal.
//! Capture frames cross into async land through a bounded channel;
//! playback samples go the other way through a shared buffer the output
//! callback drains.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate as CpalSampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, SAMPLE_RATE};
use crate::device::{AudioInputHost, CaptureTrack, DeviceCandidate};
use crate::error::{Result, VoiceError};
use crate::playback::PlaybackSink;

/// Upper bound on buffered playback samples (2 seconds at 24 kHz). Beyond
/// this the writer is dropped rather than the buffer grown.
const MAX_BUFFERED_SAMPLES: usize = SAMPLE_RATE as usize * 2;

fn stream_config() -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: CpalSampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Strip platform-specific syntax from a candidate specifier, leaving the
/// name cpal can match on. `"default"`, `":default"`, and `"audio=default"`
/// all resolve to the host default device.
fn device_name(candidate: &DeviceCandidate) -> &str {
    let spec = candidate.device.as_str();
    let spec = spec.strip_prefix("audio=").unwrap_or(spec);
    let spec = spec.strip_prefix(':').unwrap_or(spec);
    spec
}

fn resolve_input_device(candidate: &DeviceCandidate) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let name = device_name(candidate);
    if name == "default" {
        return host
            .default_input_device()
            .ok_or_else(|| VoiceError::device("no default input device"));
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| VoiceError::device(format!("failed to enumerate input devices: {e}")))?;
    devices
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| VoiceError::device(format!("no input device named {name:?}")))
}

// ── Capture ─────────────────────────────────────────────────────────────

/// cpal-backed [`AudioInputHost`]. Each opened candidate gets a dedicated
/// stream thread; dropping the returned track's receiver does not stop the
/// stream, the shutdown sender does.
pub struct CpalInput {
    shutdown: Mutex<Vec<oneshot::Sender<()>>>,
}

impl CpalInput {
    /// Create the host.
    pub fn new() -> Self {
        Self { shutdown: Mutex::new(Vec::new()) }
    }
}

impl Default for CpalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        for tx in self.shutdown.lock().drain(..) {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl AudioInputHost for CpalInput {
    async fn open(&self, candidate: &DeviceCandidate) -> Result<CaptureTrack> {
        let device = resolve_input_device(candidate)?;
        let device_label = device.name().unwrap_or_else(|_| candidate.device.clone());

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(100);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        // The stream must live on its own thread: cpal streams are !Send.
        std::thread::spawn(move || {
            let stream = device.build_input_stream(
                &stream_config(),
                move |data: &[f32], _| {
                    // try_send: the capture callback must never block.
                    if frame_tx.try_send(AudioFrame::f32(1, data.to_vec())).is_err() {
                        // Consumer is behind or gone; frame dropped.
                    }
                },
                |e| warn!(error = %e, "input stream error"),
                None,
            );
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx
                        .send(Err(VoiceError::device(format!("failed to build input stream: {e}"))));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx
                    .send(Err(VoiceError::device(format!("failed to start input stream: {e}"))));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            let _ = shutdown_rx.blocking_recv();
            debug!("input stream thread exiting");
        });

        ready_rx
            .await
            .map_err(|_| VoiceError::device("input stream thread died during setup"))??;

        self.shutdown.lock().push(shutdown_tx);
        info!(device = %device_label, "capture stream started");
        Ok(CaptureTrack { candidate: candidate.clone(), frames: frame_rx })
    }
}

// ── Playback ────────────────────────────────────────────────────────────

/// cpal-backed [`PlaybackSink`]: writes append to a shared buffer that the
/// output callback drains, filling with silence when it runs dry.
pub struct CpalPlayback {
    buffer: Arc<Mutex<VecDeque<i16>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl CpalPlayback {
    /// Open the default output device. Returns `None` when the host has no
    /// output device, letting callers fall back to a null sink.
    pub fn try_new() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let device_label = device.name().unwrap_or_else(|_| "default".to_string());

        let buffer: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let callback_buffer = buffer.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<bool>();

        std::thread::spawn(move || {
            let stream = device.build_output_stream(
                &stream_config(),
                move |out: &mut [i16], _| {
                    let mut buffer = callback_buffer.lock();
                    for slot in out.iter_mut() {
                        // Silence when the buffer runs dry.
                        *slot = buffer.pop_front().unwrap_or(0);
                    }
                },
                |e| warn!(error = %e, "output stream error"),
                None,
            );
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "failed to build output stream");
                    let _ = ready_tx.send(false);
                    return;
                }
            };
            if let Err(e) = stream.play() {
                warn!(error = %e, "failed to start output stream");
                let _ = ready_tx.send(false);
                return;
            }
            let _ = ready_tx.send(true);
            let _ = shutdown_rx.blocking_recv();
            debug!("output stream thread exiting");
        });

        if !ready_rx.recv().unwrap_or(false) {
            return None;
        }

        info!(device = %device_label, "playback stream started");
        Some(Self { buffer, shutdown: Mutex::new(Some(shutdown_tx)) })
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn write(&self, pcm: &[i16]) -> Result<()> {
        let mut buffer = self.buffer.lock();
        if buffer.len() + pcm.len() > MAX_BUFFERED_SAMPLES {
            return Err(VoiceError::device("playback buffer full"));
        }
        buffer.extend(pcm.iter().copied());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PlatformFormat;

    #[test]
    fn test_device_name_strips_platform_syntax() {
        let pulse = DeviceCandidate::new("default", PlatformFormat::Pulse);
        assert_eq!(device_name(&pulse), "default");

        let avf = DeviceCandidate::new(":default", PlatformFormat::AvFoundation);
        assert_eq!(device_name(&avf), "default");

        let dshow = DeviceCandidate::new("audio=default", PlatformFormat::DirectShow);
        assert_eq!(device_name(&dshow), "default");

        let named = DeviceCandidate::new("audio=Microphone (USB)", PlatformFormat::DirectShow);
        assert_eq!(device_name(&named), "Microphone (USB)");
    }
}

//! Audio frame definitions and sample-format conversion.
//!
//! The session protocol fixes the playback format at 24 kHz mono PCM16 in
//! 20 ms blocks. Inbound media frames may arrive with more channels or a
//! different sample type; [`AudioFrame::mono_pcm16`] normalizes them.

/// Protocol sample rate in Hz.
pub const SAMPLE_RATE: u32 = 24_000;

/// Protocol channel count (mono).
pub const CHANNELS: u16 = 1;

/// Duration of one playback block in milliseconds.
pub const FRAME_DURATION_MS: u32 = 20;

/// Samples per playback block: 20 ms at 24 kHz.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 1000) * FRAME_DURATION_MS as usize;

/// Sample payload of a frame. Planar layout: all of channel 0 first, then
/// channel 1, and so on.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// 16-bit signed integer samples (the sink's native format).
    I16(Vec<i16>),
    /// 32-bit signed integer samples.
    I32(Vec<i32>),
    /// 32-bit floating point samples, nominally in [-1.0, 1.0].
    F32(Vec<f32>),
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Samples::I16(v) => v.len(),
            Samples::I32(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }
}

/// One frame of audio with shape (channels, samples per channel).
///
/// Frames are transient: consumed and released immediately after format
/// adaptation.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    channels: usize,
    samples_per_channel: usize,
    samples: Samples,
}

impl AudioFrame {
    /// Create a frame from planar samples. A sample count that is not a
    /// multiple of `channels` is truncated to whole channels.
    pub fn new(channels: usize, samples: Samples) -> Self {
        let channels = channels.max(1);
        let samples_per_channel = samples.len() / channels;
        Self { channels, samples_per_channel, samples }
    }

    /// Create a PCM16 frame.
    pub fn pcm16(channels: usize, data: Vec<i16>) -> Self {
        Self::new(channels, Samples::I16(data))
    }

    /// Create a 32-bit float frame.
    pub fn f32(channels: usize, data: Vec<f32>) -> Self {
        Self::new(channels, Samples::F32(data))
    }

    /// Number of channels in this frame.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    /// Collapse to mono and convert to PCM16.
    ///
    /// Multi-channel frames take channel 0 — never an average, which would
    /// change loudness and phase. Float samples are scaled by the full
    /// 16-bit signed range and truncated; values outside [-1.0, 1.0] clamp
    /// to the i16 range. Integer widths are cast without rescaling. PCM16
    /// input passes through losslessly.
    pub fn mono_pcm16(&self) -> Vec<i16> {
        let n = self.samples_per_channel;
        match &self.samples {
            Samples::I16(v) => v[..n].to_vec(),
            Samples::I32(v) => v[..n].iter().map(|&s| s as i16).collect(),
            Samples::F32(v) => v[..n].iter().map(|&s| f32_to_i16(s)).collect(),
        }
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    let scaled = sample * i16::MAX as f32;
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

//! Inbound audio playback.
//!
//! Each remote track gets its own consumption loop: frames are normalized
//! to mono PCM16 and written to the sink in 20 ms blocks. The loop ends
//! cleanly when the track ends or on cancellation; a bad frame is logged
//! and skipped, never fatal to the stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audio::{AudioFrame, FRAME_SAMPLES};
use crate::error::Result;

/// Output sink for normalized 24 kHz mono PCM16 samples.
pub trait PlaybackSink: Send + Sync {
    /// Write one block of samples. Failures are treated as per-frame errors
    /// by the playback loop.
    fn write(&self, pcm: &[i16]) -> Result<()>;
}

/// Sink used when no playback capability exists on the running platform.
/// Discards samples; the session is unaffected.
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn write(&self, _pcm: &[i16]) -> Result<()> {
        Ok(())
    }
}

/// An inbound audio track announced by the peer connection.
#[derive(Debug)]
pub struct RemoteTrack {
    /// Decoded media frames. The channel closes when the track ends.
    pub frames: mpsc::Receiver<AudioFrame>,
}

/// Handle to one running playback loop.
pub struct PlaybackWorker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PlaybackWorker {
    /// Spawn a playback loop for one remote track.
    pub fn spawn(track: RemoteTrack, sink: Arc<dyn PlaybackSink>) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_playback(track, sink, stop_rx));
        Self { stop_tx, handle }
    }

    /// Cancel the loop and wait for it to observe cancellation. Must
    /// complete before the channel/connection is torn down so the loop
    /// never writes to a dead sink.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.handle.await;
    }
}

async fn run_playback(
    mut track: RemoteTrack,
    sink: Arc<dyn PlaybackSink>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = stop_rx.recv() => {
                debug!("playback cancelled");
                return;
            }

            frame = track.frames.recv() => {
                match frame {
                    // Track ended: expected termination, not an error.
                    None => {
                        debug!("remote audio track ended");
                        return;
                    }
                    Some(frame) => write_frame(&frame, sink.as_ref()),
                }
            }
        }
    }
}

fn write_frame(frame: &AudioFrame, sink: &dyn PlaybackSink) {
    let pcm = frame.mono_pcm16();
    for block in pcm.chunks(FRAME_SAMPLES) {
        if let Err(e) = sink.write(block) {
            // Best effort: one bad frame must not kill the stream.
            warn!(error = %e, "dropping playback block");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink {
        written: Mutex<Vec<Vec<i16>>>,
        fail_next: Mutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { written: Mutex::new(Vec::new()), fail_next: Mutex::new(false) })
        }
    }

    impl PlaybackSink for RecordingSink {
        fn write(&self, pcm: &[i16]) -> Result<()> {
            if std::mem::take(&mut *self.fail_next.lock()) {
                return Err(crate::error::VoiceError::connection("sink hiccup"));
            }
            self.written.lock().push(pcm.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_track_end_terminates_cleanly() {
        let (tx, rx) = mpsc::channel(4);
        let sink = RecordingSink::new();
        let worker = PlaybackWorker::spawn(RemoteTrack { frames: rx }, sink.clone());

        tx.send(AudioFrame::pcm16(1, vec![1i16; FRAME_SAMPLES])).await.unwrap();
        drop(tx);

        // Loop must exit on its own once the track ends.
        worker.handle.await.unwrap();
        assert_eq!(sink.written.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_written_in_blocks() {
        let (tx, rx) = mpsc::channel(4);
        let sink = RecordingSink::new();
        let worker = PlaybackWorker::spawn(RemoteTrack { frames: rx }, sink.clone());

        tx.send(AudioFrame::pcm16(1, vec![7i16; FRAME_SAMPLES * 3])).await.unwrap();
        drop(tx);
        worker.handle.await.unwrap();

        let written = sink.written.lock();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|b| b.len() == FRAME_SAMPLES));
    }

    #[tokio::test]
    async fn test_sink_error_does_not_kill_the_loop() {
        let (tx, rx) = mpsc::channel(4);
        let sink = RecordingSink::new();
        *sink.fail_next.lock() = true;
        let worker = PlaybackWorker::spawn(RemoteTrack { frames: rx }, sink.clone());

        tx.send(AudioFrame::pcm16(1, vec![1i16; FRAME_SAMPLES])).await.unwrap();
        tx.send(AudioFrame::pcm16(1, vec![2i16; FRAME_SAMPLES])).await.unwrap();
        drop(tx);
        worker.handle.await.unwrap();

        // First write failed and was dropped; the second landed.
        let written = sink.written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0][0], 2);
    }

    #[tokio::test]
    async fn test_stop_cancels_before_next_frame() {
        let (tx, rx) = mpsc::channel(4);
        let sink = RecordingSink::new();
        let worker = PlaybackWorker::spawn(RemoteTrack { frames: rx }, sink.clone());

        worker.stop().await;
        // Sender still alive; the loop must already be gone.
        assert!(sink.written.lock().is_empty());
        drop(tx);
    }
}

//! Command-line voice session client.
//!
//! Connects a microphone and speaker to the realtime service, prints
//! transcripts as they stream, and runs until the duration elapses, the
//! peer hangs up, or Ctrl-C.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use realtime_voice::audio_io::{CpalInput, CpalPlayback};
use realtime_voice::webrtc::Str0mPeerFactory;
use realtime_voice::{
    DEFAULT_SERVER_URL, HttpSignalingTransport, NullSink, PlaybackSink, RouterCallbacks,
    SessionConfig, SessionController,
};

#[derive(Parser, Debug)]
#[command(name = "voice-client", version, about = "Realtime voice session client")]
struct Args {
    /// Client identifier for signaling.
    #[arg(long)]
    client_id: String,

    /// Client secret for signaling. Generated randomly when omitted.
    #[arg(long)]
    client_secret: Option<String>,

    /// Signaling server base URL.
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    server_url: String,

    /// Session duration in seconds.
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Audio input device specifier. Tries platform defaults when omitted.
    #[arg(long)]
    device: Option<String>,
}

fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

/// Print a streaming transcript chunk without a newline so the assistant's
/// reply builds up on one line as it arrives.
fn write_delta(out: &mut impl Write, delta: &str) {
    let _ = write!(out, "{delta}");
    let _ = out.flush();
}

/// Terminate the streamed line, then print the full transcript.
fn write_transcript(out: &mut impl Write, transcript: &str) {
    let _ = writeln!(out, "\nassistant: {transcript}");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let client_secret = args.client_secret.unwrap_or_else(|| {
        let secret = generate_secret();
        info!(%secret, "generated client secret");
        secret
    });

    let mut config = SessionConfig::new(args.client_id, client_secret)
        .with_server_url(args.server_url);
    if let Some(device) = args.device {
        config = config.with_device(device);
    }

    let transport = match HttpSignalingTransport::new() {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!(error = %e, "failed to build signaling transport");
            return;
        }
    };

    let sink: Arc<dyn PlaybackSink> = match CpalPlayback::try_new() {
        Some(playback) => Arc::new(playback),
        None => {
            warn!("no output device available, audio playback disabled");
            Arc::new(NullSink)
        }
    };

    let callbacks = RouterCallbacks::new()
        .on_user_transcript(|text| println!("you: {text}"))
        .on_assistant_delta(|text| write_delta(&mut std::io::stdout(), text))
        .on_assistant_transcript(|text| write_transcript(&mut std::io::stdout(), text))
        .on_function_call(|call| warn!(name = %call.name, "unhandled function call"));

    let mut controller = SessionController::new(
        config,
        transport,
        Arc::new(Str0mPeerFactory::new()),
        Arc::new(CpalInput::new()),
        sink,
    )
    .with_callbacks(callbacks);

    if let Err(e) = controller.connect().await {
        error!(error = %e, "failed to connect");
        return;
    }
    if let Some(id) = controller.session_id() {
        info!(session_id = %id, "connected");
    }

    tokio::select! {
        result = controller.run() => {
            if let Err(e) = result {
                error!(error = %e, "session ended with error");
            }
        }
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {
            info!(seconds = args.duration, "duration elapsed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }

    controller.disconnect().await;
}

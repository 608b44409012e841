use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tracing::{info, warn};

use voxide::audio::{AudioSink, Microphone};
use voxide::protocol::ClientEvent;
use voxide::session::pump_microphone;
use voxide::{AssistantConfig, FunctionRegistry, SessionDispatcher, SessionError, Transport, WsTransport};

/// Voxide - Realtime voice assistant client
#[derive(Parser, Debug)]
#[command(name = "voxide")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Realtime model to use
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,

    /// Assistant voice
    #[arg(long, value_name = "VOICE")]
    voice: Option<String>,

    /// System instructions, overriding the default
    #[arg(long, value_name = "TEXT")]
    instructions: Option<String>,

    /// Input device name (defaults to the system default)
    #[arg(long, value_name = "DEVICE")]
    input_device: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = AssistantConfig::from_env()?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    if let Some(instructions) = cli.instructions {
        config.instructions = instructions;
    }

    let registry = FunctionRegistry::with_builtins();
    let (microphone, sink) = open_devices(cli.input_device.as_deref())?;

    loop {
        match run_session(&config, &registry, microphone.clone(), sink.clone()).await {
            Ok(()) => break,
            // Idle connections get dropped by the server; reconnect and
            // carry on, matching what a user expects from a long-lived
            // assistant process.
            Err(SessionError::WebSocketError(message))
                if message.contains("keepalive ping timeout") =>
            {
                warn!("connection lost ({message}), reconnecting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                microphone.stop_recording();
                return Err(e.into());
            }
        }
    }

    microphone.stop_recording();
    info!("session ended");
    Ok(())
}

/// Run one connection's worth of conversation.
async fn run_session(
    config: &AssistantConfig,
    registry: &FunctionRegistry,
    microphone: Arc<dyn Microphone>,
    sink: Arc<dyn AudioSink>,
) -> Result<(), SessionError> {
    let transport = WsTransport::connect(&config.api_key, &config.model).await?;
    transport
        .send(ClientEvent::SessionUpdate {
            session: config.build_session_config(registry),
        })
        .await?;

    microphone.start_recording();
    info!("listening, speak when ready");

    let pump = tokio::spawn(pump_microphone(microphone.clone(), transport.outbound()));

    let transcript: voxide::session::TranscriptCallback = Arc::new(|delta: String| {
        Box::pin(async move {
            use std::io::Write;
            print!("{delta}");
            let _ = std::io::stdout().flush();
        })
    });
    let dispatcher = SessionDispatcher::new(transport, microphone, sink, registry.clone())
        .on_transcript(transcript);

    let result = dispatcher.run().await;
    pump.abort();
    result
}

#[cfg(feature = "audio-cpal")]
fn open_devices(
    input_device: Option<&str>,
) -> Result<(Arc<dyn Microphone>, Arc<dyn AudioSink>), SessionError> {
    let microphone = voxide::audio::capture::CpalMicrophone::open(input_device)?;
    let sink = voxide::audio::playback::CpalSink::open()?;
    Ok((Arc::new(microphone), Arc::new(sink)))
}

#[cfg(not(feature = "audio-cpal"))]
fn open_devices(
    _input_device: Option<&str>,
) -> Result<(Arc<dyn Microphone>, Arc<dyn AudioSink>), SessionError> {
    Err(SessionError::AudioDevice(
        "built without the audio-cpal feature".to_string(),
    ))
}

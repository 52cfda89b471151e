use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use realtime_voice_client::{
    AssistantConfigSource, BackendClient, ClientConfig, ProtocolError, SessionOptions,
    ToolDispatcher, TranscriptAccumulator, VoiceClient, core::realtime::NoticeCallback,
};

/// Realtime voice assistant session client
#[derive(Parser, Debug)]
#[command(name = "realtime-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides configuration)
    #[arg(long = "backend-url", value_name = "URL")]
    backend_url: Option<String>,

    /// PCM16 WAV file streamed as the microphone
    #[arg(long = "input-wav", value_name = "FILE")]
    input_wav: Option<PathBuf>,

    /// Record the assistant's audio to this WAV file
    #[arg(long = "record-wav", value_name = "FILE")]
    record_wav: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if cli.input_wav.is_some() {
        config.input_wav = cli.input_wav;
    }
    if cli.record_wav.is_some() {
        config.record_wav = cli.record_wav;
    }
    config.validate().map_err(|e| anyhow!(e.to_string()))?;

    let backend = Arc::new(BackendClient::new(&config).map_err(|e| anyhow!(e.to_string()))?);

    // The assistant configuration gates the session
    let assistant = backend
        .fetch_config()
        .await
        .map_err(|e| anyhow!("Failed to load assistant configuration: {}", e))?;
    info!(voice = %assistant.voice, tools = assistant.tools.len(), "Assistant configuration loaded");

    let notice: NoticeCallback = Arc::new(|error: ProtocolError| {
        Box::pin(async move {
            eprintln!("[notice] {error}");
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    // Subscribe before the engine starts so the first turn is printed
    let transcript = TranscriptAccumulator::new();
    let mut entries = transcript.subscribe();
    let options = SessionOptions::new(assistant, ToolDispatcher::with_knowledge_backend(backend.clone()))
        .with_notice_callback(notice)
        .with_transcript(transcript);

    let client = VoiceClient::webrtc(&config, backend)?;
    let session = client.start(options).await?;
    println!("Session {} started, press Ctrl-C to stop", session.session_id());

    let outcome = loop {
        tokio::select! {
            entry = entries.recv() => match entry {
                Ok(entry) => println!("{}: {}", entry.speaker, entry.text),
                Err(RecvError::Lagged(skipped)) => warn!("Transcript renderer skipped {} entries", skipped),
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = session.closed() => {
                println!("Connection closed");
                break Ok(());
            }
            signal = tokio::signal::ctrl_c() => {
                break signal.map_err(|e| anyhow!("Failed to listen for Ctrl-C: {}", e));
            }
        }
    };

    session.stop().await?;
    println!("Session ended");
    outcome
}

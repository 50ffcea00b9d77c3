use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use streamscribe::config::{AudioConfig, ServerConfig};
use streamscribe::engine::dispatcher::InferenceDispatcher;
use streamscribe::engine::energy_vad::EnergyVadFactory;
use streamscribe::engine::{SpeechRecognizer, StubRecognizer, VoiceDetectorFactory};
use streamscribe::manager::SessionManager;
use streamscribe::ws::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "streamscribe", about = "Streaming speech-to-text WebSocket server")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// Maximum concurrent sessions
    #[arg(long, default_value_t = 100)]
    max_sessions: usize,

    /// Maximum concurrently executing inference jobs
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Enable verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let server = ServerConfig {
        host: args.host,
        port: args.port,
        max_sessions: args.max_sessions,
        max_inference_workers: args.workers,
        ..ServerConfig::default()
    };
    let audio = AudioConfig::default();

    let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(StubRecognizer);
    let vad_factory: Arc<dyn VoiceDetectorFactory> =
        Arc::new(EnergyVadFactory::new(audio.vad_threshold));

    let state = AppState {
        manager: Arc::new(SessionManager::new(server.max_sessions)),
        dispatcher: InferenceDispatcher::new(Arc::clone(&recognizer), server.max_inference_workers),
        recognizer,
        vad_factory,
        server: server.clone(),
        audio,
    };

    let addr: SocketAddr = format!("{}:{}", server.host, server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        "listening on {} ({} max sessions, {} inference workers)",
        addr, server.max_sessions, server.max_inference_workers
    );

    axum::serve(listener, ws::router(state)).await?;
    Ok(())
}

//! speak-cli - minimal demonstration of the `Orchestrator` surface.
//!
//! Connects to a running `tts-daemon` and a synthesis server, then speaks
//! the given text and exits once playback completes.

use anyhow::{Context, Result};
use clap::Parser;
use tts_core::{Orchestrator, OrchestratorConfig, PlaybackStatus};

/// Speaks text through a running tts-daemon.
#[derive(Parser, Debug)]
#[command(name = "speak-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Text to speak.
    text: String,

    /// Base URL of the synthesis server.
    #[arg(long, default_value = "http://127.0.0.1:5000", env = "TTS_SYNTHESIS_URL")]
    synthesis_url: String,

    /// WebSocket URL of the running daemon.
    #[arg(long, default_value = "ws://127.0.0.1:8081/ws", env = "TTS_DAEMON_URL")]
    daemon_url: String,

    /// Voice name to request from the synthesis server.
    #[arg(long, default_value = "default")]
    voice: String,

    /// Playback speed multiplier.
    #[arg(long, default_value_t = 1.0)]
    speed: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let orchestrator = Orchestrator::new(OrchestratorConfig {
        synthesis_base_url: args.synthesis_url,
        daemon_url: args.daemon_url,
        voice: args.voice,
        speed: args.speed,
        ..OrchestratorConfig::default()
    });

    orchestrator.on_status(|status| match status {
        PlaybackStatus::Started { request_id } => tracing::info!(request_id, "speaking started"),
        PlaybackStatus::SwitchedToBufferedMode { request_id } => {
            tracing::warn!(request_id, "switched to buffered playback mode")
        }
        PlaybackStatus::Completed { request_id } => tracing::info!(request_id, "speaking completed"),
        PlaybackStatus::Failed { request_id, message } => {
            tracing::error!(request_id, message, "speaking failed")
        }
    });

    orchestrator
        .speak(&args.text)
        .await
        .context("speak() failed")?;

    Ok(())
}

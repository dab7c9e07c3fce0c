//! TTS Daemon - out-of-process audio playback daemon.
//!
//! Owns the ring buffer and audio sink, terminates the socket protocol from
//! the orchestrator, and exposes a read-only `/health` endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tts_core::events::LoggingEventEmitter;
use tts_core::{serve, DaemonState};

/// TTS Daemon - out-of-process audio playback for the streaming TTS pipeline.
#[derive(Parser, Debug)]
#[command(name = "tts-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to bind the daemon's socket/health server to.
    #[arg(short = 'p', long, env = "TTS_DAEMON_PORT")]
    port: Option<u16>,

    /// PCM sample format: pcm or wav.
    #[arg(long, default_value = "pcm")]
    format: String,

    /// PCM sample rate in Hz.
    #[arg(long, env = "TTS_DAEMON_SAMPLE_RATE")]
    sample_rate: Option<u32>,

    /// Channel count (1 or 2).
    #[arg(long, env = "TTS_DAEMON_CHANNELS")]
    channels: Option<u16>,

    /// Bits per sample (8, 16, 24, or 32).
    #[arg(long, env = "TTS_DAEMON_BIT_DEPTH")]
    bit_depth: Option<u16>,

    /// Enables verbose logging.
    #[arg(long, env = "AUDIO_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        "tts_core=debug,tts_daemon=debug"
    } else {
        "tts_core=info,tts_daemon=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tts-daemon starting");

    let mut config =
        tts_core::DaemonConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(sample_rate_hz) = args.sample_rate {
        config.sample_rate_hz = sample_rate_hz;
    }
    if let Some(channels) = args.channels {
        config.channels = channels;
    }
    if let Some(bit_depth) = args.bit_depth {
        config.bit_depth = bit_depth;
    }
    if args.debug {
        config.debug = true;
    }

    tracing::info!(
        port = config.port,
        format = args.format,
        sample_rate_hz = config.sample_rate_hz,
        channels = config.channels,
        bit_depth = config.bit_depth,
        "configuration resolved"
    );

    let state = DaemonState::new(Arc::new(LoggingEventEmitter));

    let port = config.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = serve(port, state).await {
            tracing::error!(error = %e, "daemon server error");
        }
    });

    tracing::info!(port, "tts-daemon listening");

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    server_handle.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

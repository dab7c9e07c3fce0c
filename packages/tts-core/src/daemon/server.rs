//! Daemon HTTP/WebSocket surface: the socket protocol upgrade route and a
//! read-only `/health` endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::unbounded_channel;

use crate::daemon::protocol::{Inbound, Outbound};
use crate::daemon::session::PlaybackSession;
use crate::events::EventEmitter;
use crate::protocol_constants::HEARTBEAT_INTERVAL_SECS;

/// Errors that can occur starting the daemon's server.
#[derive(Debug, Error)]
pub enum DaemonServerError {
    #[error("failed to bind to port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
}

/// Shared daemon state handed to axum handlers.
#[derive(Clone)]
pub struct DaemonState {
    pub emitter: Arc<dyn EventEmitter>,
    pub started_at: Instant,
    pub active_clients: Arc<AtomicUsize>,
}

impl DaemonState {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            emitter,
            started_at: Instant::now(),
            active_clients: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Serialize)]
struct AudioProcessorHealth {
    active: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
    #[serde(rename = "audioProcessor")]
    audio_processor: AudioProcessorHealth,
    clients: usize,
}

async fn health(State(state): State<DaemonState>) -> impl IntoResponse {
    let clients = state.active_clients.load(Ordering::Relaxed);
    Json(HealthResponse {
        status: "ok",
        uptime: state.started_at.elapsed().as_secs(),
        audio_processor: AudioProcessorHealth { active: clients > 0 },
        clients,
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<DaemonState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: DaemonState) {
    state.active_clients.fetch_add(1, Ordering::Relaxed);
    run_socket(socket, &state).await;
    state.active_clients.fetch_sub(1, Ordering::Relaxed);
}

async fn run_socket(socket: WebSocket, state: &DaemonState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = unbounded_channel::<Outbound>();
    let session = PlaybackSession::new(state.emitter.clone(), outbound_tx);

    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if let Ok(text) = serde_json::to_string(&frame) {
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if let Ok(text) = serde_json::to_string(&Outbound::Heartbeat) {
                    let _ = sender.send(Message::Text(text.into())).await;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&session, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "daemon socket read error");
                        break;
                    }
                }
            }
        }
    }
}

async fn dispatch(session: &Arc<PlaybackSession>, text: &str) {
    let parsed: Result<Inbound, _> = serde_json::from_str(text);
    match parsed {
        Ok(Inbound::Control { data }) => session.handle_control(data).await,
        Ok(Inbound::AudioChunk { data }) => match data.chunk.into_bytes() {
            Ok(bytes) => session.handle_audio_chunk(bytes, data.format).await,
            Err(e) => tracing::warn!(error = %e, "dropping malformed audio_chunk frame"),
        },
        Ok(Inbound::FlowControl { data }) => session.handle_flow_control(data.pause),
        Ok(Inbound::Heartbeat) => session.handle_heartbeat(),
        Ok(Inbound::TimingAnalysis) => session.handle_timing_analysis(),
        Err(e) => tracing::warn!(error = %e, "dropping malformed daemon frame"),
    }
}

/// Builds the daemon's axum router: the socket upgrade route plus `/health`.
pub fn router(state: DaemonState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Starts the daemon's HTTP/WebSocket server on the given port.
pub async fn serve(port: u16, state: DaemonState) -> Result<(), DaemonServerError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonServerError::Bind { port, source })?;
    tracing::info!(%addr, "daemon listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| DaemonServerError::Bind {
            port,
            source: std::io::Error::other(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    #[test]
    fn daemon_state_clones_cheaply() {
        let state = DaemonState::new(Arc::new(NoopEventEmitter));
        let _clone = state.clone();
    }

    #[test]
    fn health_response_reflects_zero_clients_when_idle() {
        let state = DaemonState::new(Arc::new(NoopEventEmitter));
        assert_eq!(state.active_clients.load(Ordering::Relaxed), 0);
    }
}

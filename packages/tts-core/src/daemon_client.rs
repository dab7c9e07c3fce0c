//! Orchestrator-side client for the daemon socket protocol.
//!
//! Connects once per `speak()` call, streams chunks, and awaits `completed`
//! with listeners installed before `end_stream` is sent so a fast daemon
//! reply can never race ahead of the wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{TtsError, TtsResult};
use crate::format::AudioFormat;
use crate::protocol_constants::BACKPRESSURE_HIGH_WATERMARK;

/// Events surfaced from the daemon to the orchestrator.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    Status { state: String, buffer_utilization: f64 },
    Heartbeat,
    Error { message: String },
    Completed { forced_by_deadline: bool },
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected client session against the daemon's socket protocol.
pub struct DaemonClient {
    writer: Mutex<futures::stream::SplitSink<WsStream, Message>>,
    events: broadcast::Sender<DaemonEvent>,
    completed: Arc<Notify>,
    completed_flag: AtomicBool,
    _reader_task: tokio::task::JoinHandle<()>,
}

impl DaemonClient {
    /// Connects to the daemon at `ws://host:port/ws`.
    pub async fn connect(url: &str) -> TtsResult<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TtsError::Network(format!("daemon connect failed: {e}")))?;
        let (writer, mut reader) = stream.split();

        let (events_tx, _) = broadcast::channel(64);
        let completed = Arc::new(Notify::new());

        let events_tx_clone = events_tx.clone();
        let completed_clone = completed.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                let Ok(Message::Text(text)) = msg else { continue };
                if let Some(event) = parse_event(&text) {
                    let is_completed = matches!(event, DaemonEvent::Completed { .. });
                    let _ = events_tx_clone.send(event);
                    if is_completed {
                        completed_clone.notify_waiters();
                    }
                }
            }
        });

        Ok(Self {
            writer: Mutex::new(writer),
            events: events_tx,
            completed,
            completed_flag: AtomicBool::new(false),
            _reader_task: reader_task,
        })
    }

    /// Subscribes to the daemon's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    pub async fn start_stream(&self, format: AudioFormat) -> TtsResult<()> {
        self.send_json(json!({
            "type": "CONTROL",
            "data": { "action": "play", "format": format }
        }))
        .await
    }

    /// Writes a chunk of audio bytes, yielding briefly if the caller reports
    /// high buffer utilization (from the daemon's last `STATUS` event) so the
    /// daemon gets a chance to drain before the next chunk lands.
    pub async fn write_chunk(&self, bytes: &[u8], sequence: u64, utilization_hint: f64) -> TtsResult<()> {
        if utilization_hint > BACKPRESSURE_HIGH_WATERMARK {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.send_json(json!({
            "type": "AUDIO_CHUNK",
            "data": { "chunk": encoded, "sequence": sequence }
        }))
        .await
    }

    pub async fn pause(&self) -> TtsResult<()> {
        self.send_json(json!({ "type": "CONTROL", "data": { "action": "pause" } }))
            .await
    }

    pub async fn resume(&self) -> TtsResult<()> {
        self.send_json(json!({ "type": "CONTROL", "data": { "action": "resume" } }))
            .await
    }

    pub async fn stop(&self) -> TtsResult<()> {
        self.send_json(json!({ "type": "CONTROL", "data": { "action": "stop" } }))
            .await
    }

    /// Sends `end_stream` and awaits `completed`, with the wait armed before
    /// the frame is sent so a fast reply cannot be missed. A `status` frame
    /// reporting `state == "idle"` with an empty buffer also resolves the
    /// wait, covering daemons that settle into idle without ever emitting a
    /// distinct `completed` frame.
    pub async fn end_stream(&self, timeout: Duration) -> TtsResult<()> {
        if self.completed_flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        let notified = self.completed.notified();
        let mut events = self.subscribe();
        self.send_json(json!({ "type": "CONTROL", "data": { "action": "end_stream" } }))
            .await?;

        let wait = async {
            tokio::select! {
                _ = notified => {}
                _ = wait_for_idle_status(&mut events) => {}
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TtsError::Timeout("daemon did not signal completed in time".into()))?;

        self.completed_flag.store(true, Ordering::SeqCst);
        Ok(())
    }

}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        self._reader_task.abort();
    }
}

impl DaemonClient {
    async fn send_json(&self, value: serde_json::Value) -> TtsResult<()> {
        let text = serde_json::to_string(&value)
            .map_err(|e| TtsError::Internal(format!("failed to encode daemon frame: {e}")))?;
        self.writer
            .lock()
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TtsError::Network(format!("daemon write failed: {e}")))
    }
}

/// Waits until a `Status` event reports an idle, fully-drained buffer.
/// Lagged broadcasts are skipped rather than treated as a wakeup; a closed
/// channel just blocks forever, leaving the `completed` branch to win.
async fn wait_for_idle_status(events: &mut broadcast::Receiver<DaemonEvent>) {
    loop {
        match events.recv().await {
            Ok(DaemonEvent::Status { state, buffer_utilization }) if state == "idle" && buffer_utilization == 0.0 => {
                return;
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

fn parse_event(text: &str) -> Option<DaemonEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let ty = value.get("type")?.as_str()?;
    match ty {
        "STATUS" => {
            let data = value.get("data")?;
            Some(DaemonEvent::Status {
                state: data.get("state")?.as_str()?.to_string(),
                buffer_utilization: data.get("bufferUtilization")?.as_f64()?,
            })
        }
        "HEARTBEAT" => Some(DaemonEvent::Heartbeat),
        "ERROR" => Some(DaemonEvent::Error {
            message: value.get("data")?.get("message")?.as_str()?.to_string(),
        }),
        "COMPLETED" => Some(DaemonEvent::Completed {
            forced_by_deadline: value
                .get("data")
                .and_then(|d| d.get("forcedByDeadline"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_parses_camel_case_fields() {
        let text = r#"{"type":"STATUS","data":{"state":"playing","bufferUtilization":0.4,"audioPositionBytes":100}}"#;
        let event = parse_event(text).unwrap();
        match event {
            DaemonEvent::Status { state, buffer_utilization } => {
                assert_eq!(state, "playing");
                assert_eq!(buffer_utilization, 0.4);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn completed_event_defaults_forced_flag_to_false() {
        let text = r#"{"type":"COMPLETED","data":{}}"#;
        let event = parse_event(text).unwrap();
        assert!(matches!(event, DaemonEvent::Completed { forced_by_deadline: false }));
    }

    #[test]
    fn unknown_frame_type_is_ignored() {
        assert!(parse_event(r#"{"type":"UNKNOWN"}"#).is_none());
    }
}

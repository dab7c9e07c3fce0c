//! Wire types for the daemon socket protocol.
//!
//! Every frame is `{ type, timestamp, data }`. Inbound variants are tagged
//! `SCREAMING_SNAKE_CASE` the way the rest of this codebase tags client
//! message envelopes. `audio_chunk` accepts base64-encoded bytes as the
//! canonical wire form, with a lenient fallback for a plain byte array —
//! both normalize to `bytes::Bytes` immediately at the boundary.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::format::AudioFormat;

/// Incoming frame from the orchestrator (`DaemonClient`) to the daemon.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Inbound {
    Control { data: ControlPayload },
    AudioChunk { data: AudioChunkPayload },
    FlowControl { data: FlowControlPayload },
    Heartbeat,
    TimingAnalysis,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Play,
    Pause,
    Resume,
    Stop,
    EndStream,
    Configure,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPayload {
    pub action: ControlAction,
    #[serde(default)]
    pub format: Option<AudioFormat>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkPayload {
    pub chunk: ChunkBytes,
    #[serde(default)]
    pub format: Option<AudioFormat>,
    pub sequence: u64,
}

/// Lenient boundary type: accepts a base64 string (canonical) or a raw byte
/// array (fallback), normalizing both to [`Bytes`] on deserialization.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ChunkBytes {
    Base64(String),
    Raw(Vec<u8>),
}

impl ChunkBytes {
    pub fn into_bytes(self) -> Result<Bytes, String> {
        match self {
            ChunkBytes::Raw(bytes) => Ok(Bytes::from(bytes)),
            ChunkBytes::Base64(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(Bytes::from)
                .map_err(|e| format!("invalid base64 audio chunk: {e}")),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowControlPayload {
    pub pause: bool,
}

/// Outgoing frame from the daemon to the orchestrator.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outbound {
    Status { data: StatusPayload },
    Heartbeat,
    Error { data: ErrorPayload },
    Completed { data: CompletedPayload },
    TimingAnalysis { data: TimingPayload },
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub state: String,
    pub buffer_utilization: f64,
    pub audio_position_bytes: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    pub forced_by_deadline: bool,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TimingPayload {
    pub chunks_received: u64,
    pub bytes_processed: u64,
    pub audio_position_bytes: u64,
    pub underruns: u64,
    pub buffer_utilization: f64,
    pub expected_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_chunk_decodes_to_expected_bytes() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let chunk = ChunkBytes::Base64(encoded);
        assert_eq!(chunk.into_bytes().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn raw_array_chunk_passes_through() {
        let chunk = ChunkBytes::Raw(vec![1, 2, 3]);
        assert_eq!(chunk.into_bytes().unwrap(), Bytes::from(vec![1, 2, 3]));
    }

    #[test]
    fn inbound_control_play_parses_from_json() {
        let json = r#"{"type":"CONTROL","data":{"action":"play"}}"#;
        let parsed: Inbound = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed,
            Inbound::Control { data: ControlPayload { action: ControlAction::Play, .. } }
        ));
    }
}

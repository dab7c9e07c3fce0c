//! Event system for daemon-side session telemetry.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for playback session lifecycle
//!
//! The actual transport (the daemon socket protocol) is handled separately
//! in [`crate::daemon`]; this module only decouples domain logic from it.

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events emitted by the daemon during a playback session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Events related to session playback state.
    Session(SessionEvent),

    /// Events related to the audio sink subprocess.
    Sink(SinkEvent),
}

/// Events about a playback session's lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A new session started (first chunk or explicit `play`).
    Started {
        #[serde(rename = "requestId")]
        request_id: String,
        timestamp: u64,
    },
    /// Coarse status update: buffer utilization and audio position.
    Status {
        state: String,
        #[serde(rename = "bufferUtilization")]
        buffer_utilization: f64,
        #[serde(rename = "audioPositionBytes")]
        audio_position_bytes: u64,
        timestamp: u64,
    },
    /// Session completed (exactly once between two `play`s).
    Completed {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "forcedByDeadline")]
        forced_by_deadline: bool,
        timestamp: u64,
    },
    /// Session failed.
    Failed {
        #[serde(rename = "requestId")]
        request_id: String,
        message: String,
        timestamp: u64,
    },
}

/// Events about the audio sink subprocess.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SinkEvent {
    /// A sink subprocess was spawned.
    Spawned { player: String, timestamp: u64 },
    /// A sink subprocess exited and is being restarted.
    Restarted {
        attempt: u32,
        reason: String,
        timestamp: u64,
    },
    /// The sink fell back to chunked-file mode.
    FellBackToChunkedFile { timestamp: u64 },
    /// An underrun occurred (pull loop started early, or buffer ran dry).
    Underrun { timestamp: u64 },
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

impl From<SinkEvent> for BroadcastEvent {
    fn from(event: SinkEvent) -> Self {
        Self::Sink(event)
    }
}

//! TTS Core - shared library for the streaming text-to-speech playback pipeline.
//!
//! This crate provides the core functionality shared by the orchestrator (the
//! client-side library embedded in a host application) and the out-of-process
//! audio daemon. It is designed so both sides can be built from the same
//! wire types and protocol constants.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for session/sink telemetry
//! - [`error`]: Centralized error types
//! - [`format`]: Audio format description shared across the pipeline
//! - [`ring_buffer`]: Growable byte ring buffer backing the daemon's pull loop
//! - [`backoff`]: Backoff as a pure function of attempt count, plus a retry wrapper
//! - [`preprocess`]: Text normalization passes applied before segmentation
//! - [`segmenter`]: Text segmentation with offset-preserving fallback tiers
//! - [`http_streamer`]: Streaming HTTP client for the synthesis server
//! - [`state_machine`]: Per-session streaming lifecycle state machine
//! - [`sink`]: Subprocess-backed audio sink with restart supervision
//! - [`daemon`]: The out-of-process audio daemon (socket protocol, session, server)
//! - [`daemon_client`]: Orchestrator-side client for the daemon socket protocol
//! - [`orchestrator`]: The public `speak`/`pause`/`resume`/`stop` surface
//! - [`config`]: Daemon configuration (YAML + environment overrides)
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): emitting domain events
//!
//! Each trait has a default implementation suitable for the daemon binary; a
//! host application embedding the orchestrator can supply its own.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
pub mod daemon;
pub mod daemon_client;
pub mod error;
pub mod events;
pub mod format;
pub mod http_streamer;
pub mod orchestrator;
pub mod preprocess;
pub mod protocol_constants;
pub mod ring_buffer;
pub mod runtime;
pub mod segmenter;
pub mod sink;
pub mod state_machine;

pub use config::DaemonConfig;
pub use daemon::{serve, DaemonServerError, DaemonState, Inbound, Outbound, PlaybackSession};
pub use daemon_client::{DaemonClient, DaemonEvent};
pub use error::{ErrorCode, TtsError, TtsResult};
pub use events::{BroadcastEvent, EventEmitter, LoggingEventEmitter, NoopEventEmitter, SessionEvent, SinkEvent};
pub use format::{AudioFormat, Encoding};
pub use http_streamer::{HttpStreamer, ReceivedChunk, StreamingTiming, SynthesisRequest};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PlaybackStatus};
pub use preprocess::{preprocess, PreprocessConfig};
pub use ring_buffer::{RingBuffer, RingBufferStats};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use segmenter::{segment, SegmentKind, TextSegment};
pub use sink::AudioSink;
pub use state_machine::{StreamingState, StreamingStateMachine};

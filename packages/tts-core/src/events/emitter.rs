//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! socket or broadcast channel, enabling testing and alternative transports.

use super::{SessionEvent, SinkEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a session lifecycle event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits an audio sink event.
    fn emit_sink(&self, event: SinkEvent);
}

/// No-op emitter for testing or when a caller only needs the domain return
/// values and does not care about telemetry.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}
    fn emit_sink(&self, _event: SinkEvent) {}
}

/// Logging emitter used by the daemon in normal operation.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_sink(&self, event: SinkEvent) {
        tracing::debug!(?event, "sink_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEventEmitter {
        session_count: AtomicUsize,
        sink_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                session_count: AtomicUsize::new(0),
                sink_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_session(&self, _event: SessionEvent) {
            self.session_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_sink(&self, _event: SinkEvent) {
            self.sink_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_session(SessionEvent::Started {
            request_id: "r1".into(),
            timestamp: 0,
        });
        emitter.emit_session(SessionEvent::Completed {
            request_id: "r1".into(),
            forced_by_deadline: false,
            timestamp: 0,
        });
        emitter.emit_sink(SinkEvent::Spawned {
            player: "ffplay".into(),
            timestamp: 0,
        });

        assert_eq!(emitter.session_count.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.sink_count.load(Ordering::SeqCst), 1);
    }
}

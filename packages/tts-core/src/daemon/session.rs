//! The daemon's playback session: owns the ring buffer and the audio sink,
//! enforces the completion protocol, and turns inbound protocol frames into
//! state changes and outbound frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::daemon::protocol::{
    CompletedPayload, ControlAction, ControlPayload, ErrorPayload, Outbound, StatusPayload,
    TimingPayload,
};
use crate::events::{EventEmitter, SessionEvent};
use crate::format::AudioFormat;
use crate::protocol_constants::{
    COMPLETION_DEADLINE_CAP_MS, COMPLETION_DEADLINE_DURATION_FACTOR, COMPLETION_DEADLINE_SLACK_MS,
    DRAIN_IDLE_TERMINATE_SECS, EXPECTED_DURATION_OVERHEAD_CAP_MS,
    EXPECTED_DURATION_OVERHEAD_FACTOR, SINK_KEEPALIVE_DURATION_FACTOR, SINK_KEEPALIVE_MIN_SECS,
    STATUS_COALESCE_MS,
};
use crate::ring_buffer::RingBuffer;
use crate::sink::AudioSink;

struct Stats {
    chunks_received: AtomicU64,
    bytes_processed: AtomicU64,
    audio_position_bytes: AtomicU64,
    underruns: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Self {
            chunks_received: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            audio_position_bytes: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.chunks_received.store(0, Ordering::SeqCst);
        self.bytes_processed.store(0, Ordering::SeqCst);
        self.audio_position_bytes.store(0, Ordering::SeqCst);
        self.underruns.store(0, Ordering::SeqCst);
    }
}

/// A single daemon playback session, reused across `play`/`stop` cycles.
///
/// Exclusively owns the [`RingBuffer`] and the current [`AudioSink`]; no
/// locks are needed outside this struct by construction (see the
/// concurrency model: only this daemon's scheduler task touches them).
pub struct PlaybackSession {
    ring: Arc<RingBuffer>,
    format: Mutex<AudioFormat>,
    sink: Mutex<Option<Arc<AudioSink>>>,
    ending: AtomicBool,
    completion_emitted: AtomicBool,
    expected_duration_ms: AtomicU64,
    last_chunk_at: Mutex<Instant>,
    last_status_emitted_at: Mutex<Instant>,
    stats: Stats,
    emitter: Arc<dyn EventEmitter>,
    outbound: UnboundedSender<Outbound>,
}

impl PlaybackSession {
    pub fn new(emitter: Arc<dyn EventEmitter>, outbound: UnboundedSender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            ring: Arc::new(RingBuffer::new()),
            format: Mutex::new(AudioFormat::default()),
            sink: Mutex::new(None),
            ending: AtomicBool::new(false),
            completion_emitted: AtomicBool::new(false),
            expected_duration_ms: AtomicU64::new(0),
            last_chunk_at: Mutex::new(Instant::now()),
            last_status_emitted_at: Mutex::new(Instant::now() - Duration::from_secs(60)),
            stats: Stats::new(),
            emitter,
            outbound,
        })
    }

    pub async fn handle_control(self: &Arc<Self>, payload: ControlPayload) {
        match payload.action {
            ControlAction::Play => self.ensure_started(payload.format).await,
            ControlAction::Pause => {
                if let Some(sink) = self.sink.lock().clone() {
                    sink.pause();
                }
            }
            ControlAction::Resume => {
                if let Some(sink) = self.sink.lock().clone() {
                    sink.resume();
                }
            }
            ControlAction::Stop => self.hard_stop(),
            ControlAction::EndStream => self.begin_ending().await,
            ControlAction::Configure => {
                if let Some(format) = payload.format {
                    *self.format.lock() = format;
                }
            }
        }
    }

    pub async fn handle_audio_chunk(self: &Arc<Self>, bytes: bytes::Bytes, format: Option<AudioFormat>) {
        if self.sink.lock().is_none() {
            self.ensure_started(format).await;
        } else if let Some(format) = format {
            *self.format.lock() = format;
        }

        self.ring.write(&bytes);
        self.stats.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_processed
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.stats
            .audio_position_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        *self.last_chunk_at.lock() = Instant::now();

        self.update_expected_duration();
        self.maybe_emit_status();
    }

    pub fn handle_flow_control(&self, pause: bool) {
        if let Some(sink) = self.sink.lock().clone() {
            if pause {
                sink.pause();
            } else {
                sink.resume();
            }
        }
    }

    pub fn handle_heartbeat(&self) {
        let _ = self.outbound.send(Outbound::Heartbeat);
    }

    pub fn handle_timing_analysis(&self) {
        let ring_stats = self.ring.stats();
        let timing = TimingPayload {
            chunks_received: self.stats.chunks_received.load(Ordering::Relaxed),
            bytes_processed: self.stats.bytes_processed.load(Ordering::Relaxed),
            audio_position_bytes: self.stats.audio_position_bytes.load(Ordering::Relaxed),
            underruns: ring_stats.underruns,
            buffer_utilization: ring_stats.utilization(),
            expected_duration_ms: self.expected_duration_ms.load(Ordering::Relaxed),
        };
        let _ = self.outbound.send(Outbound::TimingAnalysis { data: timing });
    }

    async fn ensure_started(self: &Arc<Self>, format: Option<AudioFormat>) {
        if let Some(format) = format {
            *self.format.lock() = format;
        }

        let already_active = self.sink.lock().is_some();
        if already_active {
            if let Some(sink) = self.sink.lock().clone() {
                sink.resume();
            }
            return;
        }

        if self.ring.is_empty() {
            self.stats.reset();
            self.ending.store(false, Ordering::SeqCst);
            self.completion_emitted.store(false, Ordering::SeqCst);
        }

        let format = *self.format.lock();
        let sink = Arc::new(AudioSink::new(self.ring.clone(), format, self.emitter.clone()));
        *self.sink.lock() = Some(sink.clone());

        self.emitter.emit_session(SessionEvent::Started {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_ms(),
        });

        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.run().await {
                let _ = session.outbound.send(Outbound::Error {
                    data: ErrorPayload { message: e.to_string() },
                });
            }
            session.on_sink_exited().await;
        });

        let reaper = self.clone();
        tokio::spawn(async move { reaper.reap_if_abandoned().await });
    }

    /// Stops an abandoned sink: one that has gone idle past the drain
    /// threshold without an `end_stream` ever arriving. Tolerates the
    /// ordinary gaps between synthesized segments by waiting out at least
    /// [`Self::keepalive_window`] before the idle check is allowed to fire.
    async fn reap_if_abandoned(self: Arc<Self>) {
        let started_at = Instant::now();
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;

            if self.sink.lock().is_none() {
                return;
            }
            if self.ending.load(Ordering::SeqCst) {
                // `begin_ending`'s own deadline watcher owns shutdown from here.
                return;
            }
            if started_at.elapsed() < self.keepalive_window() {
                continue;
            }
            if self.ring.is_empty() && self.drain_idle_expired() {
                tracing::warn!("playback session idle past drain threshold with no end_stream; stopping");
                self.hard_stop();
                return;
            }
        }
    }

    async fn begin_ending(self: &Arc<Self>) {
        self.ending.store(true, Ordering::SeqCst);
        self.ring.mark_finished();

        if self.sink.lock().is_none() {
            // nothing was ever played: complete immediately.
            self.emit_completed(false);
            return;
        }

        let expected = self.expected_duration_ms.load(Ordering::Relaxed);
        let buffered_ms = {
            let format = *self.format.lock();
            format.duration_ms_for_bytes(self.ring.size() as u64)
        };
        let deadline_ms = (((expected as f64 * COMPLETION_DEADLINE_DURATION_FACTOR)
            .max(expected as f64 + buffered_ms as f64)
            as u64)
            + COMPLETION_DEADLINE_SLACK_MS)
            .min(COMPLETION_DEADLINE_CAP_MS);

        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
            if session.ending.load(Ordering::SeqCst) {
                session.emit_completed(true);
            }
        });
    }

    async fn on_sink_exited(self: &Arc<Self>) {
        *self.sink.lock() = None;
        if self.ending.load(Ordering::SeqCst) {
            self.emit_completed(false);
        }
    }

    fn hard_stop(&self) {
        if let Some(sink) = self.sink.lock().take() {
            sink.stop();
        }
        self.ring.clear();
        self.ending.store(false, Ordering::SeqCst);
        self.completion_emitted.store(false, Ordering::SeqCst);
    }

    fn emit_completed(&self, forced_by_deadline: bool) {
        let already = self
            .completion_emitted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();
        if already {
            return;
        }
        self.ending.store(false, Ordering::SeqCst);
        self.ring.clear();
        let _ = self.outbound.send(Outbound::Completed {
            data: CompletedPayload { forced_by_deadline },
        });
    }

    fn update_expected_duration(&self) {
        let format = *self.format.lock();
        let bytes = self.stats.bytes_processed.load(Ordering::Relaxed);
        let base = format.duration_ms_for_bytes(bytes);
        let overhead = ((base as f64 * EXPECTED_DURATION_OVERHEAD_FACTOR) as u64)
            .min(EXPECTED_DURATION_OVERHEAD_CAP_MS);
        self.expected_duration_ms.store(base + overhead, Ordering::Relaxed);
    }

    fn maybe_emit_status(&self) {
        let mut last = self.last_status_emitted_at.lock();
        if last.elapsed() < Duration::from_millis(STATUS_COALESCE_MS) {
            return;
        }
        *last = Instant::now();
        let ring_stats = self.ring.stats();
        let state = if self.ending.load(Ordering::SeqCst) {
            "draining"
        } else if self.sink.lock().is_some() {
            "playing"
        } else {
            "idle"
        };
        let _ = self.outbound.send(Outbound::Status {
            data: StatusPayload {
                state: state.to_string(),
                buffer_utilization: ring_stats.utilization(),
                audio_position_bytes: self.stats.audio_position_bytes.load(Ordering::Relaxed),
            },
        });
    }

    /// Minimum time the sink should be kept alive while draining, to
    /// tolerate pauses between synthesized segments.
    fn keepalive_window(&self) -> Duration {
        let expected = self.expected_duration_ms.load(Ordering::Relaxed);
        Duration::from_secs(
            (expected / 1000 * SINK_KEEPALIVE_DURATION_FACTOR).max(SINK_KEEPALIVE_MIN_SECS),
        )
    }

    /// True once draining has been idle long enough to allow termination.
    fn drain_idle_expired(&self) -> bool {
        self.last_chunk_at.lock().elapsed() > Duration::from_secs(DRAIN_IDLE_TERMINATE_SECS)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use tokio::sync::mpsc::unbounded_channel;

    fn new_session() -> (Arc<PlaybackSession>, tokio::sync::mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = unbounded_channel();
        (PlaybackSession::new(Arc::new(NoopEventEmitter), tx), rx)
    }

    #[tokio::test]
    async fn end_stream_on_empty_buffer_completes_immediately() {
        let (session, mut rx) = new_session();
        session.begin_ending().await;
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, Outbound::Completed { .. }));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (session, _rx) = new_session();
        session.hard_stop();
        session.hard_stop();
        assert_eq!(session.ring.size(), 0);
    }

    #[tokio::test]
    async fn heartbeat_is_acked() {
        let (session, mut rx) = new_session();
        session.handle_heartbeat();
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Heartbeat));
    }

    #[tokio::test]
    async fn completion_is_emitted_at_most_once() {
        let (session, mut rx) = new_session();
        session.emit_completed(false);
        session.emit_completed(false);
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Completed { .. }));
        assert!(rx.try_recv().is_err());
    }
}

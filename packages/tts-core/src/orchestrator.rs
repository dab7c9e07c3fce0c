//! Public playback surface: `speak`, `pause`, `resume`, `stop`.
//!
//! Owns a single in-flight session at a time. Opens one [`DaemonClient`]
//! connection per `speak()` call, segments the input, streams each segment
//! through [`HttpStreamer`], and forwards chunks to the daemon while the
//! [`StreamingStateMachine`] says streaming is still legal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff::with_retry;
use crate::daemon_client::{DaemonClient, DaemonEvent};
use crate::error::{TtsError, TtsResult};
use crate::format::AudioFormat;
use crate::http_streamer::{HttpStreamer, SynthesisRequest};
use crate::preprocess::{preprocess, PreprocessConfig};
use crate::protocol_constants::{HTTP_MAX_RETRY_ATTEMPTS, HTTP_RETRY_DELAYS_MS, MAX_SEGMENT_CHARS};
use crate::segmenter::segment;
use crate::state_machine::StreamingStateMachine;

const COMPLETION_AWAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// User-facing playback status, reported through [`Orchestrator::speak`]'s
/// status callback.
#[derive(Debug, Clone)]
pub enum PlaybackStatus {
    Started { request_id: String },
    SwitchedToBufferedMode { request_id: String },
    Completed { request_id: String },
    Failed { request_id: String, message: String },
}

/// Configuration for a single [`Orchestrator`] instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub synthesis_base_url: String,
    pub daemon_url: String,
    pub voice: String,
    pub speed: f32,
    pub lang: String,
    pub format: AudioFormat,
    pub preprocessors: PreprocessConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            synthesis_base_url: "http://127.0.0.1:5000".into(),
            daemon_url: "ws://127.0.0.1:8081/ws".into(),
            voice: "default".into(),
            speed: 1.0,
            lang: "en".into(),
            format: AudioFormat::default(),
            preprocessors: PreprocessConfig::default(),
        }
    }
}

struct ActiveSession {
    cancel: CancellationToken,
    state_machine: Arc<StreamingStateMachine>,
    daemon: Arc<DaemonClient>,
}

/// Coordinates text segmentation, HTTP streaming synthesis, and daemon
/// playback for a single logical speaker.
pub struct Orchestrator {
    config: OrchestratorConfig,
    streamer: HttpStreamer,
    active: Mutex<Option<ActiveSession>>,
    playing: AtomicBool,
    paused: AtomicBool,
    status: SyncMutex<Option<Box<dyn Fn(PlaybackStatus) + Send + Sync>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let streamer = HttpStreamer::new(config.synthesis_base_url.clone());
        Self {
            config,
            streamer,
            active: Mutex::new(None),
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            status: SyncMutex::new(None),
        }
    }

    /// Registers a callback invoked with status updates during `speak()`.
    pub fn on_status(&self, callback: impl Fn(PlaybackStatus) + Send + Sync + 'static) {
        *self.status.lock() = Some(Box::new(callback));
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn report(&self, status: PlaybackStatus) {
        if let Some(callback) = self.status.lock().as_ref() {
            callback(status);
        }
    }

    /// Speaks `text` end to end: segments it, streams each segment's audio
    /// from the synthesis server, and forwards it to the daemon. Resolves
    /// only once the daemon reports `completed` for the whole utterance.
    pub async fn speak(&self, text: &str) -> TtsResult<()> {
        if text.trim().is_empty() {
            return Err(TtsError::Protocol("cannot speak empty text".into()));
        }

        self.stop().await?;

        let request_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let state_machine = Arc::new(StreamingStateMachine::new());
        let daemon = Arc::new(DaemonClient::connect(&self.config.daemon_url).await?);

        *self.active.lock().await = Some(ActiveSession {
            cancel: cancel.clone(),
            state_machine: state_machine.clone(),
            daemon: daemon.clone(),
        });
        self.playing.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.report(PlaybackStatus::Started {
            request_id: request_id.clone(),
        });

        let result = self
            .run_session(text, &request_id, &cancel, &state_machine, &daemon)
            .await;

        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        *self.active.lock().await = None;

        match &result {
            Ok(()) => self.report(PlaybackStatus::Completed { request_id }),
            Err(TtsError::Canceled(_)) => {}
            Err(e) => self.report(PlaybackStatus::Failed {
                request_id,
                message: e.user_message().to_string(),
            }),
        }

        result
    }

    async fn run_session(
        &self,
        text: &str,
        request_id: &str,
        cancel: &CancellationToken,
        state_machine: &Arc<StreamingStateMachine>,
        daemon: &Arc<DaemonClient>,
    ) -> TtsResult<()> {
        let preprocessed = preprocess(text, &self.config.preprocessors);
        let segments = segment(&preprocessed, MAX_SEGMENT_CHARS)?;

        daemon.start_stream(self.config.format).await?;
        state_machine
            .start(|| async { Ok(()) }, |_attempt| {})
            .await?;

        let utilization_bits = Arc::new(AtomicU64::new(0));
        let utilization_tracker = {
            let utilization_bits = utilization_bits.clone();
            let mut events = daemon.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(DaemonEvent::Status { buffer_utilization, .. }) => {
                            utilization_bits.store(buffer_utilization.to_bits(), Ordering::Relaxed);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let result = self
            .stream_segments(&segments, request_id, cancel, state_machine, daemon, &utilization_bits)
            .await;
        utilization_tracker.abort();
        result?;

        state_machine.complete()?;
        daemon.end_stream(COMPLETION_AWAIT_TIMEOUT).await?;
        Ok(())
    }

    /// Streams each segment in order. Once sustained degradation is
    /// observed, or a segment's streaming attempt fails non-recoverably
    /// before it has played, every remaining segment (including the one
    /// that just failed) is re-synthesized and played in buffered mode
    /// instead, per §4.8's fallback.
    #[allow(clippy::too_many_arguments)]
    async fn stream_segments(
        &self,
        segments: &[crate::segmenter::TextSegment],
        request_id: &str,
        cancel: &CancellationToken,
        state_machine: &Arc<StreamingStateMachine>,
        daemon: &Arc<DaemonClient>,
        utilization_bits: &Arc<AtomicU64>,
    ) -> TtsResult<()> {
        let mut degraded = false;

        for seg in segments {
            if cancel.is_cancelled() {
                return Err(TtsError::Canceled("user stop".into()));
            }

            if degraded {
                self.stream_segment_buffered(seg, cancel, daemon, utilization_bits).await?;
                continue;
            }

            let result = self
                .stream_segment_live(seg, cancel, state_machine, daemon, utilization_bits)
                .await;

            match result {
                Ok(()) => {
                    if state_machine.is_degrading() {
                        degraded = true;
                        self.report(PlaybackStatus::SwitchedToBufferedMode {
                            request_id: request_id.to_string(),
                        });
                    }
                }
                Err(TtsError::Canceled(reason)) => return Err(TtsError::Canceled(reason)),
                Err(_) => {
                    // Non-recoverable streaming failure for a segment not yet played:
                    // fall back to buffered synthesis for it and everything after.
                    degraded = true;
                    self.report(PlaybackStatus::SwitchedToBufferedMode {
                        request_id: request_id.to_string(),
                    });
                    self.stream_segment_buffered(seg, cancel, daemon, utilization_bits).await?;
                }
            }
        }

        Ok(())
    }

    /// Streams one segment's PCM chunks directly to the daemon as they
    /// arrive from the synthesis server.
    async fn stream_segment_live(
        &self,
        seg: &crate::segmenter::TextSegment,
        cancel: &CancellationToken,
        state_machine: &Arc<StreamingStateMachine>,
        daemon: &Arc<DaemonClient>,
        utilization_bits: &Arc<AtomicU64>,
    ) -> TtsResult<()> {
        let request = SynthesisRequest {
            text: seg.text.clone(),
            voice: self.config.voice.clone(),
            speed: self.config.speed,
            lang: self.config.lang.clone(),
            stream: true,
            format: "pcm".into(),
        };

        let streamer = &self.streamer;
        let sequence = std::sync::atomic::AtomicU64::new(0);
        with_retry(
            "synthesis_stream",
            HTTP_MAX_RETRY_ATTEMPTS,
            |attempt| {
                HTTP_RETRY_DELAYS_MS
                    .get(attempt as usize)
                    .copied()
                    .unwrap_or(*HTTP_RETRY_DELAYS_MS.last().unwrap())
            },
            || {
                let request = request.clone();
                async move {
                    let mut last_chunk_at: Option<Instant> = None;
                    streamer
                        .stream(&request, cancel, |chunk| {
                            if !state_machine.can_stream() {
                                return;
                            }
                            if let Some(prev) = last_chunk_at {
                                state_machine.record_chunk_delay(prev.elapsed());
                            }
                            last_chunk_at = Some(Instant::now());
                            let seq = sequence.fetch_add(1, Ordering::SeqCst);
                            let daemon = daemon.clone();
                            let bytes = chunk.bytes;
                            let utilization_hint = f64::from_bits(utilization_bits.load(Ordering::Relaxed));
                            tokio::spawn(async move {
                                let _ = daemon.write_chunk(&bytes, seq, utilization_hint).await;
                            });
                        })
                        .await
                }
            },
        )
        .await?;

        Ok(())
    }

    /// Re-synthesizes one segment with `stream=false`/`format=wav`,
    /// accumulates the full response body, and submits it to the daemon as
    /// a single chunk.
    async fn stream_segment_buffered(
        &self,
        seg: &crate::segmenter::TextSegment,
        cancel: &CancellationToken,
        daemon: &Arc<DaemonClient>,
        utilization_bits: &Arc<AtomicU64>,
    ) -> TtsResult<()> {
        let request = SynthesisRequest {
            text: seg.text.clone(),
            voice: self.config.voice.clone(),
            speed: self.config.speed,
            lang: self.config.lang.clone(),
            stream: false,
            format: "wav".into(),
        };

        let streamer = &self.streamer;
        let buffer = with_retry(
            "synthesis_buffered",
            HTTP_MAX_RETRY_ATTEMPTS,
            |attempt| {
                HTTP_RETRY_DELAYS_MS
                    .get(attempt as usize)
                    .copied()
                    .unwrap_or(*HTTP_RETRY_DELAYS_MS.last().unwrap())
            },
            || {
                let request = request.clone();
                async move {
                    let mut accumulated = Vec::new();
                    streamer
                        .stream(&request, cancel, |chunk| accumulated.extend_from_slice(&chunk.bytes))
                        .await?;
                    Ok::<Vec<u8>, TtsError>(accumulated)
                }
            },
        )
        .await?;

        let utilization_hint = f64::from_bits(utilization_bits.load(Ordering::Relaxed));
        daemon.write_chunk(&buffer, 0, utilization_hint).await
    }

    pub async fn pause(&self) -> TtsResult<()> {
        let guard = self.active.lock().await;
        if let Some(active) = guard.as_ref() {
            active.daemon.pause().await?;
        }
        drop(guard);
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn resume(&self) -> TtsResult<()> {
        let guard = self.active.lock().await;
        if let Some(active) = guard.as_ref() {
            active.daemon.resume().await?;
        }
        drop(guard);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Cancels any in-flight session. Idempotent: a second `stop()` with no
    /// active session is a no-op.
    pub async fn stop(&self) -> TtsResult<()> {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.cancel.cancel();
            let _ = active.state_machine.terminate();
            let _ = active.daemon.stop().await;
        }
        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_orchestrator_is_not_playing() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        assert!(!orchestrator.is_playing());
        assert!(!orchestrator.is_paused());
    }

    #[tokio::test]
    async fn speak_rejects_empty_text() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let result = orchestrator.speak("   ").await;
        assert!(matches!(result, Err(TtsError::Protocol(_))));
    }

    #[tokio::test]
    async fn stop_with_no_active_session_is_a_no_op() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.stop().await.unwrap();
        orchestrator.stop().await.unwrap();
    }
}

//! Drives a native audio subprocess from the ring buffer.
//!
//! Selection policy, resolved once per session and then cached: try a
//! streaming PCM player that accepts raw PCM on stdin; if none spawn, fall
//! back to chunked-file mode (buffer ~1s into a WAV file, play sequentially).
//! Adapted from the `Stdio::piped()` subprocess pattern used for native
//! media players, generalized with async I/O, supervision, and restart
//! backoff.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Notify;

use crate::backoff::exponential_delay_ms;
use crate::error::{TtsError, TtsResult};
use crate::events::{EventEmitter, SinkEvent};
use crate::format::AudioFormat;
use crate::protocol_constants::{
    PREMATURE_EXIT_THRESHOLD_MS, PULL_CHUNK_MS, PULL_LOOP_IDLE_SLEEP_MS,
    SINK_RESTART_BACKOFF_CAP_MS, SINK_RESTART_BACKOFF_FACTOR, SINK_RESTART_BASE_DELAY_MS,
    SINK_RESTART_MAX_ATTEMPTS, SINK_RESTART_WINDOW_SECS, SINK_STARTUP_TIMEOUT_MS,
};
use crate::ring_buffer::RingBuffer;

struct StreamingCandidate {
    program: &'static str,
    args: fn(&AudioFormat) -> Vec<String>,
}

fn ffplay_args(format: &AudioFormat) -> Vec<String> {
    vec![
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        format.sample_rate_hz.to_string(),
        "-ac".into(),
        format.channels.to_string(),
        "-nodisp".into(),
        "-autoexit".into(),
        "-loglevel".into(),
        "quiet".into(),
        "-".into(),
    ]
}

fn aplay_args(format: &AudioFormat) -> Vec<String> {
    vec![
        "-q".into(),
        "-f".into(),
        "S16_LE".into(),
        "-r".into(),
        format.sample_rate_hz.to_string(),
        "-c".into(),
        format.channels.to_string(),
        "-".into(),
    ]
}

const STREAMING_CANDIDATES: &[StreamingCandidate] = &[
    StreamingCandidate { program: "ffplay", args: ffplay_args },
    StreamingCandidate { program: "aplay", args: aplay_args },
];

/// System player used to play a finished WAV file in chunked-file fallback mode.
const CHUNKED_FILE_PLAYER: &str = "ffplay";

fn chunked_file_player_args(path: &std::path::Path) -> Vec<String> {
    vec![
        "-nodisp".into(),
        "-autoexit".into(),
        "-loglevel".into(),
        "quiet".into(),
        path.to_string_lossy().into_owned(),
    ]
}

fn spawn_streaming_candidate(candidate: &StreamingCandidate, format: &AudioFormat) -> std::io::Result<Child> {
    Command::new(candidate.program)
        .args((candidate.args)(format))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

/// Selects and spawns the first available streaming PCM player.
fn spawn_streaming_player(format: &AudioFormat) -> TtsResult<(Child, &'static str)> {
    for candidate in STREAMING_CANDIDATES {
        match spawn_streaming_candidate(candidate, format) {
            Ok(child) => return Ok((child, candidate.program)),
            Err(e) => {
                tracing::warn!(player = candidate.program, error = %e, "streaming player unavailable");
            }
        }
    }
    Err(TtsError::Sink("no streaming PCM player available".into()))
}

/// Live statistics for the current sink session.
pub struct SinkStats {
    pub bytes_written: AtomicU64,
    pub underruns: AtomicU64,
    pub restarts: AtomicU64,
}

impl SinkStats {
    fn new() -> Self {
        Self {
            bytes_written: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }
}

/// Drives a native audio subprocess from a [`RingBuffer`].
///
/// One `AudioSink` is created per daemon playback session. `run` owns the
/// pull loop and runs until the buffer is drained and marked finished, the
/// session is stopped, or restart attempts are exhausted.
pub struct AudioSink {
    ring: Arc<RingBuffer>,
    format: AudioFormat,
    emitter: Arc<dyn EventEmitter>,
    paused: AtomicBool,
    stopped: AtomicBool,
    stats: SinkStats,
    completed: Arc<Notify>,
}

impl AudioSink {
    pub fn new(ring: Arc<RingBuffer>, format: AudioFormat, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            ring,
            format,
            emitter,
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stats: SinkStats::new(),
            completed: Arc::new(Notify::new()),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.ring.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves when the sink has finished (buffer drained and marked
    /// finished, and the subprocess has exited) or was stopped.
    pub fn completion_signal(&self) -> Arc<Notify> {
        self.completed.clone()
    }

    /// Runs the pull loop to completion. Spawns, supervises, and (on
    /// failure) restarts the underlying subprocess as needed.
    pub async fn run(self: Arc<Self>) -> TtsResult<()> {
        let preroll = self.wait_for_preroll().await;
        if preroll {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
            self.emitter.emit_sink(SinkEvent::Underrun {
                timestamp: now_ms(),
            });
        }

        let mut attempts_in_window = 0u32;
        let mut window_start = Instant::now();

        'restart: loop {
            if self.is_stopped() {
                break;
            }

            let spawn_result = spawn_streaming_player(&self.format);
            let (mut child, mode) = match spawn_result {
                Ok((child, player)) => {
                    self.emitter.emit_sink(SinkEvent::Spawned {
                        player: player.to_string(),
                        timestamp: now_ms(),
                    });
                    (child, SinkMode::StreamingPcm)
                }
                Err(_) => {
                    self.emitter.emit_sink(SinkEvent::FellBackToChunkedFile {
                        timestamp: now_ms(),
                    });
                    return self.run_chunked_file_fallback().await;
                }
            };

            let mut stdin = child.stdin.take().ok_or_else(|| {
                TtsError::Sink("spawned player has no stdin pipe".into())
            })?;

            let outcome = self.feed_until_drained_or_crash(&mut stdin, &mut child, mode).await;
            drop(stdin);

            match outcome {
                FeedOutcome::Drained => {
                    let _ = child.wait().await;
                    self.completed.notify_waiters();
                    return Ok(());
                }
                FeedOutcome::Stopped => {
                    let _ = child.kill().await;
                    self.completed.notify_waiters();
                    return Ok(());
                }
                FeedOutcome::Crashed { exit_code } => {
                    let buffered_ms = self
                        .format
                        .duration_ms_for_bytes(self.ring.size() as u64);
                    let premature = exit_code == Some(0) && buffered_ms >= PREMATURE_EXIT_THRESHOLD_MS;
                    if exit_code != Some(0) || premature {
                        if window_start.elapsed() > Duration::from_secs(SINK_RESTART_WINDOW_SECS) {
                            attempts_in_window = 0;
                            window_start = Instant::now();
                        }
                        attempts_in_window += 1;
                        if attempts_in_window > SINK_RESTART_MAX_ATTEMPTS {
                            return Err(TtsError::Sink(
                                "audio sink exhausted restart attempts".into(),
                            ));
                        }
                        let delay = exponential_delay_ms(
                            attempts_in_window - 1,
                            SINK_RESTART_BASE_DELAY_MS,
                            SINK_RESTART_BACKOFF_FACTOR,
                            SINK_RESTART_BACKOFF_CAP_MS,
                        );
                        self.stats.restarts.fetch_add(1, Ordering::Relaxed);
                        self.emitter.emit_sink(SinkEvent::Restarted {
                            attempt: attempts_in_window,
                            reason: format!("exit_code={exit_code:?}"),
                            timestamp: now_ms(),
                        });
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue 'restart;
                    }
                    let _ = child.wait().await;
                    self.completed.notify_waiters();
                    return Ok(());
                }
            }
        }

        self.completed.notify_waiters();
        Ok(())
    }

    async fn wait_for_preroll(&self) -> bool {
        let target_bytes = self
            .format
            .frame_bytes(crate::protocol_constants::SINK_PREROLL_MS as u32);
        let deadline = Instant::now() + Duration::from_millis(SINK_STARTUP_TIMEOUT_MS);
        while self.ring.size() < target_bytes && !self.ring.is_finished() {
            if Instant::now() >= deadline {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(PULL_LOOP_IDLE_SLEEP_MS)).await;
        }
        false
    }

    async fn feed_until_drained_or_crash(
        &self,
        stdin: &mut tokio::process::ChildStdin,
        child: &mut Child,
        _mode: SinkMode,
    ) -> FeedOutcome {
        let chunk_bytes = self.format.frame_bytes(PULL_CHUNK_MS as u32).max(1);

        loop {
            if self.is_stopped() {
                return FeedOutcome::Stopped;
            }

            if let Ok(Some(status)) = child.try_wait() {
                return FeedOutcome::Crashed {
                    exit_code: status.code(),
                };
            }

            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(PULL_LOOP_IDLE_SLEEP_MS)).await;
                continue;
            }

            let data = self.ring.read(chunk_bytes);
            if data.is_empty() {
                if self.ring.is_finished() {
                    return FeedOutcome::Drained;
                }
                tokio::time::sleep(Duration::from_millis(PULL_LOOP_IDLE_SLEEP_MS)).await;
                continue;
            }

            if let Err(e) = stdin.write_all(&data).await {
                tracing::warn!(error = %e, "sink stdin write failed");
                return FeedOutcome::Crashed { exit_code: None };
            }
            self.stats
                .bytes_written
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }
    }

    /// Plays ~1s WAV files sequentially but overlapped: the next file's
    /// player is spawned as soon as its WAV is written, before the previous
    /// player is awaited, so the previous player's tail and the next
    /// player's startup happen concurrently instead of leaving a gap
    /// between files.
    async fn run_chunked_file_fallback(self: Arc<Self>) -> TtsResult<()> {
        let dir = tempfile::tempdir()
            .map_err(|e| TtsError::Sink(format!("could not create scratch directory: {e}")))?;
        let approx_file_bytes = self.format.bytes_per_second(); // ~1s per file

        let mut index = 0u64;
        let mut pending: Option<(Child, PathBuf)> = None;
        loop {
            if self.is_stopped() {
                break;
            }

            let data = self.ring.read(approx_file_bytes as usize);
            if data.is_empty() {
                if self.ring.is_finished() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(PULL_LOOP_IDLE_SLEEP_MS)).await;
                continue;
            }

            let path = dir.path().join(format!("chunk-{index}.wav"));
            index += 1;
            write_wav_file(&path, &data, self.format)
                .map_err(|e| TtsError::Sink(format!("could not write scratch wav: {e}")))?;

            let child = Command::new(CHUNKED_FILE_PLAYER)
                .args(chunked_file_player_args(&path))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| TtsError::Sink(format!("chunked-file player failed to spawn: {e}")))?;

            if let Some((mut prev_child, prev_path)) = pending.replace((child, path)) {
                let _ = prev_child.wait().await;
                let _ = std::fs::remove_file(&prev_path);
            }

            self.stats
                .bytes_written
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }

        if let Some((mut child, path)) = pending {
            let _ = child.wait().await;
            let _ = std::fs::remove_file(&path);
        }

        self.completed.notify_waiters();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum SinkMode {
    StreamingPcm,
}

enum FeedOutcome {
    Drained,
    Stopped,
    Crashed { exit_code: Option<i32> },
}

fn write_wav_file(path: &PathBuf, pcm: &[u8], format: AudioFormat) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;

    let byte_rate = format.bytes_per_second() as u32;
    let block_align = (format.channels as u32 * format.bytes_per_sample() as u32) as u16;
    let data_len = pcm.len() as u32;

    file.write_all(b"RIFF")?;
    file.write_all(&(36 + data_len).to_le_bytes())?;
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?; // PCM
    file.write_all(&format.channels.to_le_bytes())?;
    file.write_all(&format.sample_rate_hz.to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&format.bit_depth.to_le_bytes())?;
    file.write_all(b"data")?;
    file.write_all(&data_len.to_le_bytes())?;
    file.write_all(pcm)?;
    Ok(())
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
    use crate::format::Encoding;

    fn test_format() -> AudioFormat {
        AudioFormat::new(Encoding::PcmS16Le, 8000, 1, 16)
    }

    #[test]
    fn wav_header_round_trips_channel_and_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        let format = test_format();
        write_wav_file(&path, &[0u8; 16], format).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let channels = u16::from_le_bytes([bytes[22], bytes[23]]);
        assert_eq!(channels, 1);
    }

    #[tokio::test]
    async fn stop_before_run_clears_buffer_and_notifies() {
        let ring = Arc::new(RingBuffer::new());
        ring.write(b"some audio bytes");
        let sink = Arc::new(AudioSink::new(ring.clone(), test_format(), Arc::new(NoopEventEmitter)));
        sink.stop();
        assert!(sink.is_stopped());
        assert_eq!(ring.size(), 0);
    }

    // `cat` stands in for a streaming player: it reads stdin until EOF or
    // until killed, which is all the feed loop needs from a "sink subprocess".
    fn spawn_cat() -> Child {
        Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("cat must be available for this test")
    }

    #[tokio::test]
    async fn feed_loop_drains_buffer_into_a_live_subprocess() {
        let ring = Arc::new(RingBuffer::new());
        ring.write(&[1u8; 4096]);
        ring.mark_finished();
        let sink = AudioSink::new(ring, test_format(), Arc::new(NoopEventEmitter));

        let mut child = spawn_cat();
        let mut stdin = child.stdin.take().unwrap();
        let outcome = sink
            .feed_until_drained_or_crash(&mut stdin, &mut child, SinkMode::StreamingPcm)
            .await;
        drop(stdin);
        let _ = child.wait().await;

        assert!(matches!(outcome, FeedOutcome::Drained));
        assert_eq!(sink.stats.bytes_written.load(Ordering::Relaxed), 4096);
    }

    #[tokio::test]
    async fn feed_loop_reports_crash_when_subprocess_exits_early() {
        let ring = Arc::new(RingBuffer::new());
        ring.write(&[1u8; 4096]); // left unfinished: the sink must notice the child died first
        let sink = AudioSink::new(ring, test_format(), Arc::new(NoopEventEmitter));

        let mut child = spawn_cat();
        let mut stdin = child.stdin.take().unwrap();
        child.kill().await.unwrap();
        let _ = child.wait().await; // reap so try_wait observes the exit

        let outcome = sink
            .feed_until_drained_or_crash(&mut stdin, &mut child, SinkMode::StreamingPcm)
            .await;

        assert!(matches!(outcome, FeedOutcome::Crashed { .. }));
    }

    #[tokio::test]
    async fn feed_loop_stops_immediately_once_stopped() {
        let ring = Arc::new(RingBuffer::new());
        ring.write(&[1u8; 4096]);
        let sink = AudioSink::new(ring, test_format(), Arc::new(NoopEventEmitter));
        sink.stop();

        let mut child = spawn_cat();
        let mut stdin = child.stdin.take().unwrap();
        let outcome = sink
            .feed_until_drained_or_crash(&mut stdin, &mut child, SinkMode::StreamingPcm)
            .await;
        drop(stdin);
        let _ = child.kill().await;

        assert!(matches!(outcome, FeedOutcome::Stopped));
    }
}

//! Fixed protocol constants that should NOT be changed.
//!
//! These values shape the wire protocol between the orchestrator and the
//! daemon, and the timing contracts of the playback state machine. Changing
//! them changes observable behavior, not just tuning.

// ─────────────────────────────────────────────────────────────────────────────
// Ring buffer growth
// ─────────────────────────────────────────────────────────────────────────────

/// Growth factor applied to ring buffer capacity when a write would overflow it.
pub const RING_BUFFER_GROWTH_FACTOR: f64 = 1.5;

/// Initial ring buffer capacity (bytes).
///
/// Large enough to hold roughly 1s of 48kHz 16-bit stereo audio without an
/// immediate grow on the first few chunks.
pub const RING_BUFFER_INITIAL_CAPACITY: usize = 192_000;

// ─────────────────────────────────────────────────────────────────────────────
// Audio format defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default audio sample rate (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Default number of audio channels (mono, matching most TTS voices).
pub const DEFAULT_CHANNELS: u16 = 1;

/// Default bit depth (16-bit signed PCM).
pub const DEFAULT_BIT_DEPTH: u16 = 16;

/// Sample rates accepted without a warning.
pub const KNOWN_SAMPLE_RATES: [u32; 7] = [8000, 16000, 22050, 24000, 32000, 44100, 48000];

// ─────────────────────────────────────────────────────────────────────────────
// Audio sink startup and pull loop
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum buffered audio before the pull loop starts feeding the sink (ms).
pub const SINK_PREROLL_MS: u64 = 250;

/// Maximum time to wait for preroll before starting anyway (ms).
///
/// Starting early under this timeout counts as an underrun.
pub const SINK_STARTUP_TIMEOUT_MS: u64 = 2000;

/// Pull loop read chunk size (ms of audio per iteration).
pub const PULL_CHUNK_MS: u64 = 50;

/// Sleep duration when the ring buffer is empty and not yet finished (ms).
pub const PULL_LOOP_IDLE_SLEEP_MS: u64 = 10;

/// Minimum buffered audio (ms) for a zero-exit to be treated as premature
/// rather than a clean finish.
pub const PREMATURE_EXIT_THRESHOLD_MS: u64 = 100;

/// Base delay for subprocess restart backoff (ms).
pub const SINK_RESTART_BASE_DELAY_MS: u64 = 500;

/// Backoff multiplier applied per restart attempt.
pub const SINK_RESTART_BACKOFF_FACTOR: f64 = 2.0;

/// Cap on subprocess restart backoff delay (ms).
pub const SINK_RESTART_BACKOFF_CAP_MS: u64 = 5000;

/// Maximum subprocess restart attempts within the rolling window below.
pub const SINK_RESTART_MAX_ATTEMPTS: u32 = 5;

/// Rolling window over which restart attempts are counted (seconds).
pub const SINK_RESTART_WINDOW_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Daemon completion protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Hard cap on the completion deadline regardless of expected duration (ms).
///
/// Exists to bound how long a client can be left waiting for `completed` if
/// duration estimation goes wrong.
pub const COMPLETION_DEADLINE_CAP_MS: u64 = 12_000;

/// Extra time added to the duration-derived completion deadline (ms).
pub const COMPLETION_DEADLINE_SLACK_MS: u64 = 2000;

/// Multiplier applied to expected duration when deriving the completion deadline.
pub const COMPLETION_DEADLINE_DURATION_FACTOR: f64 = 1.5;

/// Overhead cap added on top of byte-derived expected duration (ms).
pub const EXPECTED_DURATION_OVERHEAD_CAP_MS: u64 = 50;

/// Fractional overhead applied to byte-derived expected duration.
pub const EXPECTED_DURATION_OVERHEAD_FACTOR: f64 = 0.01;

/// Minimum keep-alive window for the sink subprocess between chunks (seconds).
pub const SINK_KEEPALIVE_MIN_SECS: u64 = 30;

/// Multiplier applied to expected duration when deriving the keep-alive window.
pub const SINK_KEEPALIVE_DURATION_FACTOR: u64 = 5;

/// Idle time since the last chunk after which a draining session may terminate (secs).
pub const DRAIN_IDLE_TERMINATE_SECS: u64 = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Daemon socket protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum interval between coalesced `status` frames (ms).
pub const STATUS_COALESCE_MS: u64 = 2000;

/// Interval between `heartbeat` frames (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Buffer utilization above which the client should slow chunk writes.
pub const BACKPRESSURE_HIGH_WATERMARK: f64 = 0.85;

/// Buffer utilization below which the client may resume normal write rate.
pub const BACKPRESSURE_LOW_WATERMARK: f64 = 0.6;

// ─────────────────────────────────────────────────────────────────────────────
// Text segmentation
// ─────────────────────────────────────────────────────────────────────────────

/// Hard upper bound on segment length (characters), enforced regardless of
/// what the caller requests.
pub const MAX_SEGMENT_CHARS: usize = 1800;

/// Minimum word count for the excessive-repetition heuristic to apply.
pub const REPETITION_HEURISTIC_MIN_WORDS: usize = 10;

/// Fraction of total tokens a single word may occupy before being flagged.
pub const REPETITION_HEURISTIC_MAX_FRACTION: f64 = 0.2;

/// Minimum word length considered by the repetition heuristic.
pub const REPETITION_HEURISTIC_MIN_WORD_LEN: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP streaming synthesis
// ─────────────────────────────────────────────────────────────────────────────

/// Total timeout for a synthesis HTTP request (seconds).
pub const HTTP_TOTAL_TIMEOUT_SECS: u64 = 60;

/// Idle-read timeout while streaming a synthesis response body (seconds).
pub const HTTP_READ_IDLE_TIMEOUT_SECS: u64 = 30;

/// Maximum retry attempts for a synthesis request.
pub const HTTP_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Retry backoff delays for synthesis requests (ms), applied in order.
pub const HTTP_RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum startup attempts before the state machine gives up.
pub const STATE_MACHINE_MAX_START_ATTEMPTS: u32 = 3;

/// Startup retry backoff delays (ms), in order; the last value repeats if
/// more attempts remain than entries.
pub const STATE_MACHINE_START_BACKOFF_MS: [u64; 3] = [1000, 2000, 4000];

/// Cap on startup retry backoff (ms).
pub const STATE_MACHINE_START_BACKOFF_CAP_MS: u64 = 5000;

/// Per-attempt startup timeout (ms).
pub const STATE_MACHINE_STARTUP_TIMEOUT_MS: u64 = 5000;

/// Heartbeat probe interval while streaming (ms).
pub const STATE_MACHINE_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Heartbeat staleness threshold: chunks must be acknowledged within this
/// window or the probe counts as a failure (seconds).
pub const STATE_MACHINE_HEARTBEAT_STALE_SECS: u64 = 10;

/// Consecutive heartbeat failures before the session fails.
pub const STATE_MACHINE_MAX_HEARTBEAT_FAILURES: u32 = 3;

/// Number of recent chunk delays retained for the degradation signal.
pub const QUALITY_WINDOW_SIZE: usize = 100;

/// Moving-average chunk delay above which the session is "degrading" (ms).
pub const QUALITY_DEGRADING_AVG_MS: f64 = 100.0;

/// Single chunk delay above which the session is "degrading" (ms).
pub const QUALITY_DEGRADING_MAX_MS: f64 = 500.0;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Default daemon socket port.
pub const DEFAULT_DAEMON_PORT: u16 = 8081;

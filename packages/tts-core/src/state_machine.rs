//! Finite-state machine governing a single speak session: startup retries,
//! heartbeat-based health probing, and a degradation signal the orchestrator
//! can use to fall back to buffered playback.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backoff::scheduled_delay_ms;
use crate::error::{TtsError, TtsResult};
use crate::protocol_constants::{
    QUALITY_DEGRADING_AVG_MS, QUALITY_DEGRADING_MAX_MS, QUALITY_WINDOW_SIZE,
    STATE_MACHINE_MAX_HEARTBEAT_FAILURES, STATE_MACHINE_MAX_START_ATTEMPTS,
    STATE_MACHINE_STARTUP_TIMEOUT_MS, STATE_MACHINE_START_BACKOFF_CAP_MS,
    STATE_MACHINE_START_BACKOFF_MS,
};

/// A playback session's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Idle,
    Starting,
    Streaming,
    Completed,
    Failed,
    Terminated,
}

impl StreamingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    fn can_transition_to(self, next: Self) -> bool {
        use StreamingState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Idle, Failed)
                | (Idle, Terminated)
                | (Starting, Streaming)
                | (Starting, Failed)
                | (Starting, Terminated)
                | (Streaming, Completed)
                | (Streaming, Failed)
                | (Streaming, Terminated)
        )
    }
}

struct Inner {
    state: StreamingState,
    last_error: Option<String>,
    chunk_delays: VecDeque<Duration>,
    consecutive_heartbeat_failures: u32,
}

/// Drives a session through [`StreamingState`] and records health signals.
pub struct StreamingStateMachine {
    inner: Mutex<Inner>,
}

impl StreamingStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: StreamingState::Idle,
                last_error: None,
                chunk_delays: VecDeque::with_capacity(QUALITY_WINDOW_SIZE),
                consecutive_heartbeat_failures: 0,
            }),
        }
    }

    pub fn state(&self) -> StreamingState {
        self.inner.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// True while in a state where chunks may still be forwarded downstream.
    pub fn can_stream(&self) -> bool {
        matches!(self.state(), StreamingState::Starting | StreamingState::Streaming)
    }

    fn transition(&self, next: StreamingState) -> TtsResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(next) {
            return Err(TtsError::Internal(format!(
                "illegal transition {:?} -> {:?}",
                inner.state, next
            )));
        }
        inner.state = next;
        Ok(())
    }

    /// Attempts `start_fn` up to [`STATE_MACHINE_MAX_START_ATTEMPTS`] times
    /// with exponential backoff, invoking `retry_fn` between attempts.
    /// Transitions to `Streaming` on success, `Failed` if attempts are
    /// exhausted or a single attempt exceeds the per-attempt timeout.
    pub async fn start<F, Fut>(&self, mut start_fn: F, mut retry_fn: impl FnMut(u32)) -> TtsResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TtsResult<()>>,
    {
        self.transition(StreamingState::Starting)?;

        let mut last_error = None;
        for attempt in 0..STATE_MACHINE_MAX_START_ATTEMPTS {
            if attempt > 0 {
                retry_fn(attempt);
                let delay = scheduled_delay_ms(
                    &STATE_MACHINE_START_BACKOFF_MS,
                    attempt - 1,
                    STATE_MACHINE_START_BACKOFF_CAP_MS,
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let attempt_result = tokio::time::timeout(
                Duration::from_millis(STATE_MACHINE_STARTUP_TIMEOUT_MS),
                start_fn(),
            )
            .await;

            match attempt_result {
                Ok(Ok(())) => {
                    self.transition(StreamingState::Streaming)?;
                    return Ok(());
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => last_error = Some(TtsError::Timeout("startup attempt timed out".into())),
            }
        }

        let err = last_error.unwrap_or_else(|| TtsError::Internal("no start attempts made".into()));
        self.fail(err.to_string());
        Err(err)
    }

    /// Records a heartbeat probe result. Three consecutive failures
    /// transition the session to `Failed`.
    pub fn record_heartbeat(&self, alive: bool) {
        let should_fail = {
            let mut inner = self.inner.lock();
            if alive {
                inner.consecutive_heartbeat_failures = 0;
                false
            } else {
                inner.consecutive_heartbeat_failures += 1;
                inner.consecutive_heartbeat_failures >= STATE_MACHINE_MAX_HEARTBEAT_FAILURES
            }
        };
        if should_fail {
            self.fail("heartbeat probe failed repeatedly".into());
        }
    }

    /// Records a chunk processing delay for the degradation signal.
    pub fn record_chunk_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock();
        if inner.chunk_delays.len() == QUALITY_WINDOW_SIZE {
            inner.chunk_delays.pop_front();
        }
        inner.chunk_delays.push_back(delay);
    }

    /// True if recent chunk delays indicate sustained degradation.
    pub fn is_degrading(&self) -> bool {
        let inner = self.inner.lock();
        if inner.chunk_delays.is_empty() {
            return false;
        }
        let total: Duration = inner.chunk_delays.iter().sum();
        let avg_ms = total.as_secs_f64() * 1000.0 / inner.chunk_delays.len() as f64;
        let max_ms = inner
            .chunk_delays
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .fold(0.0, f64::max);
        avg_ms > QUALITY_DEGRADING_AVG_MS || max_ms > QUALITY_DEGRADING_MAX_MS
    }

    pub fn complete(&self) -> TtsResult<()> {
        self.transition(StreamingState::Completed)
    }

    pub fn terminate(&self) -> TtsResult<()> {
        self.transition(StreamingState::Terminated)
    }

    fn fail(&self, message: String) {
        let mut inner = self.inner.lock();
        inner.last_error = Some(message);
        inner.state = StreamingState::Failed;
    }
}

impl Default for StreamingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn successful_start_transitions_to_streaming() {
        let machine = StreamingStateMachine::new();
        machine.start(|| async { Ok(()) }, |_| {}).await.unwrap();
        assert_eq!(machine.state(), StreamingState::Streaming);
    }

    #[tokio::test]
    async fn exhausted_retries_transition_to_failed() {
        let machine = StreamingStateMachine::new();
        let result = machine
            .start(
                || async { Err(TtsError::Sink("no device".into())) },
                |_| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(machine.state(), StreamingState::Failed);
    }

    #[tokio::test]
    async fn retries_are_attempted_before_failing() {
        let machine = StreamingStateMachine::new();
        let attempts = AtomicU32::new(0);
        let _ = machine
            .start(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(TtsError::Sink("transient".into())) }
                },
                |_| {},
            )
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn terminal_states_have_no_outbound_transitions() {
        let machine = StreamingStateMachine::new();
        machine.fail("x".into());
        assert!(machine.complete().is_err());
        assert!(machine.terminate().is_err());
    }

    #[test]
    fn degradation_signal_trips_on_high_average_delay() {
        let machine = StreamingStateMachine::new();
        for _ in 0..10 {
            machine.record_chunk_delay(Duration::from_millis(150));
        }
        assert!(machine.is_degrading());
    }

    #[test]
    fn three_consecutive_heartbeat_failures_fail_the_session() {
        let machine = StreamingStateMachine::new();
        machine.record_heartbeat(false);
        machine.record_heartbeat(false);
        assert_eq!(machine.state(), StreamingState::Idle);
        machine.record_heartbeat(false);
        assert_eq!(machine.state(), StreamingState::Failed);
    }
}

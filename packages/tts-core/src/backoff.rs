//! Backoff as a pure function of attempt count, and a generic retry wrapper
//! built on top of it.
//!
//! Both the HTTP streamer's request retries and the audio sink's subprocess
//! restarts need "wait longer each time, up to a cap" — this is the one
//! place that shape lives.

use std::time::Duration;

use crate::error::TtsError;

/// Exponential backoff delay for the given zero-indexed attempt number,
/// starting from `base_ms` and multiplying by `factor` each attempt, capped
/// at `cap_ms`.
pub fn exponential_delay_ms(attempt: u32, base_ms: u64, factor: f64, cap_ms: u64) -> u64 {
    let scaled = base_ms as f64 * factor.powi(attempt as i32);
    (scaled.min(cap_ms as f64)) as u64
}

/// Looks up a delay from a fixed schedule, repeating the last entry if
/// `attempt` runs past the end of the schedule, capped at `cap_ms`.
pub fn scheduled_delay_ms(schedule: &[u64], attempt: u32, cap_ms: u64) -> u64 {
    let idx = (attempt as usize).min(schedule.len().saturating_sub(1));
    schedule.get(idx).copied().unwrap_or(cap_ms).min(cap_ms)
}

/// Executes `operation` with retries on transient errors, sleeping
/// `delay_ms(attempt)` between attempts. Non-transient errors (per
/// [`TtsError::is_transient`]) fail immediately without consuming a retry.
pub async fn with_retry<F, Fut, T>(
    action: &str,
    max_attempts: u32,
    delay_ms: impl Fn(u32) -> u64,
    mut operation: F,
) -> Result<T, TtsError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TtsError>>,
{
    let mut last_error = None;
    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = delay_ms(attempt - 1);
            tracing::info!(action, attempt, delay_ms = delay, "retrying");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                tracing::warn!(action, %e, "transient error");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| TtsError::Internal("retry loop ran zero attempts".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_grows_then_caps() {
        assert_eq!(exponential_delay_ms(0, 500, 2.0, 5000), 500);
        assert_eq!(exponential_delay_ms(1, 500, 2.0, 5000), 1000);
        assert_eq!(exponential_delay_ms(2, 500, 2.0, 5000), 2000);
        assert_eq!(exponential_delay_ms(10, 500, 2.0, 5000), 5000);
    }

    #[test]
    fn scheduled_delay_repeats_last_entry_past_the_end() {
        let schedule = [1000, 2000, 4000];
        assert_eq!(scheduled_delay_ms(&schedule, 0, 5000), 1000);
        assert_eq!(scheduled_delay_ms(&schedule, 2, 5000), 4000);
        assert_eq!(scheduled_delay_ms(&schedule, 9, 5000), 4000);
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_transient_failures() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = with_retry("test", 3, |_| 1, || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TtsError::Network("transient".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_retry_fails_fast_on_non_transient_error() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), TtsError> = with_retry("test", 3, |_| 1, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(TtsError::Protocol("bad frame".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}

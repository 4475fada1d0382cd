//! Retry loop with exponential backoff.
//!
//! Every network dispatch routes through [`run`]: up to
//! `max_retries + 1` attempts, sleeping between them with an
//! exponential backoff that starts near 100 ms and caps at 8 s. A
//! terminal classification ([`LlmError::is_retryable`] is `false`)
//! aborts the loop immediately and propagates.

use std::time::Duration;

use crate::error::LlmError;

/// First backoff interval.
pub const BASE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Ceiling on the interval between attempts.
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(8);

/// Runs `op` with retries.
///
/// `op` is attempted up to `max_retries + 1` times. Retryable failures
/// sleep [`backoff_delay`] and try again; terminal failures and
/// successes return immediately.
pub async fn run<T, F, Fut>(provider: &str, max_retries: u32, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>>,
{
    let attempts = max_retries.saturating_add(1);
    let mut last_err: Option<LlmError> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            let last = last_err
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            tracing::warn!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_err.expect("at least one attempt ran"))
}

/// Backoff before the given attempt (1-based): 100 ms doubling per
/// attempt, capped at 8 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(10);
    (BASE_RETRY_INTERVAL * factor).min(MAX_RETRY_INTERVAL)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use http::StatusCode;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(100));
        assert_eq!(backoff_delay(2), Duration::from_millis(200));
        assert_eq!(backoff_delay(3), Duration::from_millis(400));
        assert_eq!(backoff_delay(7), Duration::from_millis(6400));
        assert_eq!(backoff_delay(8), MAX_RETRY_INTERVAL);
        assert_eq!(backoff_delay(30), MAX_RETRY_INTERVAL);
    }

    #[test]
    fn test_backoff_strictly_increasing_until_cap() {
        let mut prev = Duration::ZERO;
        for attempt in 1..=7 {
            let d = backoff_delay(attempt);
            assert!(d > prev);
            prev = d;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        // Two 503s, then a 200: exactly three attempts issued.
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = run("test", 3, || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(LlmError::from_status(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream overloaded",
                ))
            } else {
                Ok("body")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "body");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_aborts_immediately() {
        // 401 must not be retried: exactly one attempt.
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = run("test", 3, || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::from_status(
                StatusCode::UNAUTHORIZED,
                r#"{"error":{"message":"bad key"}}"#,
            ))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.message, "bad key");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exceeded_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = run("test", 5, || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::from_status(
                StatusCode::TOO_MANY_REQUESTS,
                "quota exceeded for this billing period",
            ))
        })
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::QuotaExceeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let result: Result<(), _> = run("test", 2, || async {
            Err(LlmError::from_status(StatusCode::BAD_GATEWAY, ""))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Server);
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let _: Result<(), _> = run("test", 0, || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::from_status(StatusCode::INTERNAL_SERVER_ERROR, ""))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

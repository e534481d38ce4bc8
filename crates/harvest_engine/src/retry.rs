use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Try again after a backoff, unless attempts are exhausted.
    Retry,
    /// Stop now and report the failure as terminal.
    Abort,
}

/// Maps a failure onto the retry policy.
///
/// 404 is terminal unless `escalate_not_found`; timeouts are retried unless
/// `soft_timeouts`. Failures that cannot improve on a second try abort.
pub fn classify(kind: &FailureKind, policy: &RetryPolicy) -> RetryDisposition {
    match kind {
        FailureKind::HttpStatus(404) if !policy.escalate_not_found => RetryDisposition::Abort,
        FailureKind::HttpStatus(_) => RetryDisposition::Retry,
        FailureKind::Timeout if policy.soft_timeouts => RetryDisposition::Abort,
        FailureKind::Timeout | FailureKind::Network => RetryDisposition::Retry,
        FailureKind::InvalidUrl
        | FailureKind::RedirectLimitExceeded
        | FailureKind::TooLarge { .. }
        | FailureKind::Decode
        | FailureKind::Cancelled => RetryDisposition::Abort,
    }
}

/// Delay before the attempt following `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`.
pub fn backoff_delay(attempt: usize, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31) as u32;
    base.saturating_mul(1u32 << exponent).min(max)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The last error, after `attempts` tries.
    Failed { error: E, attempts: usize },
    /// Cancellation was observed before a terminal outcome.
    Cancelled { attempts: usize },
}

/// Runs `operation` until it succeeds, `classify` aborts, or `policy.max_attempts`
/// is reached. `on_retry(attempt, delay, &err)` fires before each backoff sleep.
pub async fn retry_with_backoff<T, E, F, Fut, C, L>(
    policy: &RetryPolicy,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
    mut classify: C,
    mut on_retry: L,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> RetryDisposition,
    L: FnMut(usize, Duration, &E),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if classify(&err) == RetryDisposition::Abort || attempt >= max_attempts {
            return Err(RetryError::Failed {
                error: err,
                attempts: attempt,
            });
        }

        let delay = backoff_delay(attempt, policy.base_delay, policy.max_delay);
        on_retry(attempt, delay, &err);

        if let Some(token) = cancellation {
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = sleep(delay) => {}
            }
        } else {
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        assert_eq!(backoff_delay(1, base, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, base, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, base, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, base, max), Duration::from_secs(10));
        assert_eq!(backoff_delay(200, base, max), Duration::from_secs(10));
    }

    #[test]
    fn classification_follows_policy_switches() {
        let default = RetryPolicy::default();
        assert_eq!(classify(&FailureKind::HttpStatus(404), &default), RetryDisposition::Abort);
        assert_eq!(classify(&FailureKind::HttpStatus(500), &default), RetryDisposition::Retry);
        assert_eq!(classify(&FailureKind::HttpStatus(429), &default), RetryDisposition::Retry);
        assert_eq!(classify(&FailureKind::Timeout, &default), RetryDisposition::Retry);
        assert_eq!(classify(&FailureKind::Network, &default), RetryDisposition::Retry);
        assert_eq!(classify(&FailureKind::Decode, &default), RetryDisposition::Abort);

        let strict = RetryPolicy {
            escalate_not_found: true,
            soft_timeouts: true,
            ..RetryPolicy::default()
        };
        assert_eq!(classify(&FailureKind::HttpStatus(404), &strict), RetryDisposition::Retry);
        assert_eq!(classify(&FailureKind::Timeout, &strict), RetryDisposition::Abort);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Cell::new(0);
        let mut delays = Vec::new();
        let result: Result<&str, RetryError<&str>> = retry_with_backoff(
            &policy(3),
            None,
            |attempt| {
                calls.set(calls.get() + 1);
                async move { if attempt < 3 { Err("flaky") } else { Ok("done") } }
            },
            |_| RetryDisposition::Retry,
            |_, delay, _| delays.push(delay),
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
        assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_error_and_attempts() {
        let result: Result<(), RetryError<u16>> = retry_with_backoff(
            &policy(3),
            None,
            |attempt| async move { Err(500 + attempt as u16) },
            |_| RetryDisposition::Retry,
            |_, _, _| {},
        )
        .await;

        assert_eq!(result, Err(RetryError::Failed { error: 503, attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_after_first_attempt() {
        let result: Result<(), RetryError<&str>> = retry_with_backoff(
            &policy(5),
            None,
            |_| async { Err("gone") },
            |_| RetryDisposition::Abort,
            |_, _, _| panic!("must not retry"),
        )
        .await;

        assert_eq!(result, Err(RetryError::Failed { error: "gone", attempts: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let result: Result<(), RetryError<&str>> = retry_with_backoff(
            &policy(5),
            Some(&token),
            |_| async { Err("slow") },
            |_| RetryDisposition::Retry,
            |_, _, _| trigger.cancel(),
        )
        .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
    }
}

//! Retry Wrapper (§4.2) — a policy-only decorator around a [`ModelAdapter`]
//! call.
//!
//! Deliberately holds no per-model state (no circuit breaker, no
//! consecutive-failure counters): the spec's contract is a stateless
//! decision per call — attempt count, retryable flag, backoff — not a
//! cross-call health model. A circuit-breaker-style component would be a
//! reasonable *addition* on top of this wrapper, but the source stack's own
//! breaker is keyed on a model enum this engine has no equivalent of, and
//! nothing in §4.2 asks for it.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

use crate::adapter::AdapterError;
use crate::config::RetryPolicy;

/// Retry Wrapper failure: either every attempt was exhausted, or the
/// underlying error was non-retryable and re-raised immediately.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{0}")]
    Adapter(#[from] AdapterError),
}

impl RetryError {
    pub fn into_adapter_error(self) -> AdapterError {
        match self {
            Self::Adapter(e) => e,
        }
    }
}

/// Callback invoked before each retry sleep: `(attempt, error, delay)`.
/// `attempt` is 1-indexed (the attempt that just failed).
pub type OnRetry<'a> = dyn Fn(u32, &AdapterError, Duration) + Send + Sync + 'a;

/// Compute the backoff delay for a given attempt index (0-indexed: the
/// delay before the *next* attempt after `attempt` failures).
fn backoff_delay(attempt: u32, policy: &RetryPolicy, jitter: bool) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let base = policy.base_delay_ms.saturating_mul(exp).min(policy.max_delay_ms);
    let millis = if jitter {
        let factor: f64 = rand::rng().random_range(0.5..=1.0);
        (base as f64 * factor).round() as u64
    } else {
        base
    };
    Duration::from_millis(millis)
}

/// Execute `call_once` up to `1 + policy.max_attempts` times, retrying only
/// errors whose `retryable()` is true. Non-retryable errors re-raise
/// immediately. `deterministic_mode` forces `maxAttempts` to 0 and disables
/// jitter, per §4.2.
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    deterministic_mode: bool,
    on_retry: Option<&OnRetry<'_>>,
    mut call_once: F,
) -> Result<crate::adapter::AdapterResponse, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<crate::adapter::AdapterResponse, AdapterError>>,
{
    let max_attempts = if deterministic_mode { 0 } else { policy.max_attempts };
    let mut attempt = 0u32;
    loop {
        match call_once().await {
            Ok(response) => return Ok(response),
            Err(err) => {
                if !err.retryable() || attempt >= max_attempts {
                    return Err(RetryError::Adapter(err));
                }
                let mut delay = backoff_delay(attempt, policy, !deterministic_mode);
                if let Some(hint) = err.retry_after() {
                    delay = delay.max(hint);
                }
                if let Some(cb) = on_retry {
                    cb(attempt + 1, &err, delay);
                }
                attempt += 1;
                if !deterministic_mode {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterResponse;
    use crate::model::TokenUsage;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 1000,
        }
    }

    fn ok_response() -> AdapterResponse {
        AdapterResponse {
            content: "ok".into(),
            token_usage: TokenUsage::zero(),
            latency_ms: 0,
            raw_response: None,
        }
    }

    fn retryable_error() -> AdapterError {
        AdapterError::Timeout {
            provider: "mock".into(),
            model: "m1".into(),
            elapsed_ms: 1,
        }
    }

    fn non_retryable_error() -> AdapterError {
        AdapterError::Construction {
            provider: "mock".into(),
            model: "m1".into(),
            reason: "bad config".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_first_call_ok() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(), false, None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(ok_response()) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(), false, None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(retryable_error()) }
        })
        .await;
        assert!(result.is_err());
        // 1 initial + 3 retries = 4 calls total.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(), false, None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(non_retryable_error()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deterministic_mode_disables_retries() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(), true, None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(retryable_error()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_retry_callback_fires_with_one_indexed_attempt() {
        let seen = std::sync::Mutex::new(Vec::new());
        let calls = AtomicU32::new(0);
        let _ = with_retry(&policy(), false, Some(&|attempt, _err, _delay| {
            seen.lock().unwrap().push(attempt);
        }), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(retryable_error())
                } else {
                    Ok(ok_response())
                }
            }
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        assert_eq!(backoff_delay(0, &p, false), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, &p, false), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, &p, false), Duration::from_millis(400));
        assert_eq!(backoff_delay(10, &p, false), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        };
        for _ in 0..50 {
            let d = backoff_delay(0, &p, true).as_millis();
            assert!((500..=1000).contains(&d));
        }
    }

    #[tokio::test]
    async fn rate_limit_hint_raises_delay_floor() {
        let p = RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 1000,
        };
        let seen_delay = std::sync::Mutex::new(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let _ = with_retry(&p, false, Some(&|_attempt, _err, delay| {
            *seen_delay.lock().unwrap() = delay;
        }), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(AdapterError::RateLimit {
                        provider: "mock".into(),
                        model: "m1".into(),
                        retry_after: Some(Duration::from_millis(5000)),
                    })
                } else {
                    Ok(ok_response())
                }
            }
        })
        .await;
        assert!(*seen_delay.lock().unwrap() >= Duration::from_millis(5000));
    }
}

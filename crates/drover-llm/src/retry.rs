// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::LlmError;

/// Invoked with `(attempt, max_attempts)` before each retry sleep.
pub type RetryListener = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Exponential backoff policy for completion attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub num_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(num_retries: u32, min_wait_secs: u64, max_wait_secs: u64, multiplier: f64) -> Self {
        Self {
            num_retries,
            min_wait: Duration::from_secs(min_wait_secs),
            max_wait: Duration::from_secs(max_wait_secs),
            multiplier,
        }
    }

    /// Wait before retry number `attempt` (1-based).
    ///
    /// `wait = clamp(multiplier * 2^attempt, min_wait, max_wait)`.  A
    /// provider-sent `Retry-After` value takes precedence, capped at
    /// `max_wait`.
    pub fn wait_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        if let Some(secs) = retry_after {
            return Duration::from_secs(secs).min(self.max_wait);
        }
        let secs = self.multiplier * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(secs).clamp(self.min_wait, self.max_wait)
    }
}

/// Drive `op` until it succeeds, fails with a non-retriable error, or the
/// attempt budget is exhausted.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    listener: Option<&RetryListener>,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retriable() && attempt + 1 < policy.num_retries.max(1) => {
                let retry_after = match &e {
                    LlmError::RateLimited { retry_after, .. } => *retry_after,
                    _ => None,
                };
                attempt += 1;
                if let Some(l) = listener {
                    l(attempt, policy.num_retries);
                }
                let wait = policy.wait_for(attempt, retry_after);
                warn!(
                    attempt,
                    max_attempts = policy.num_retries,
                    wait_secs = wait.as_secs_f64(),
                    error = %e,
                    "completion attempt failed; retrying"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(num_retries: u32) -> RetryPolicy {
        RetryPolicy {
            num_retries,
            min_wait: Duration::from_millis(1),
            max_wait: Duration::from_millis(2),
            multiplier: 0.001,
        }
    }

    #[test]
    fn wait_is_clamped_between_min_and_max() {
        let p = RetryPolicy::new(5, 8, 64, 8.0);
        assert_eq!(p.wait_for(1, None), Duration::from_secs(16));
        assert_eq!(p.wait_for(2, None), Duration::from_secs(32));
        assert_eq!(p.wait_for(3, None), Duration::from_secs(64));
        // Past the cap it stays at max_wait.
        assert_eq!(p.wait_for(10, None), Duration::from_secs(64));
    }

    #[test]
    fn wait_respects_min_clamp() {
        let p = RetryPolicy::new(5, 8, 64, 0.5);
        assert_eq!(p.wait_for(1, None), Duration::from_secs(8));
    }

    #[test]
    fn retry_after_overrides_backoff_but_is_capped() {
        let p = RetryPolicy::new(5, 8, 64, 8.0);
        assert_eq!(p.wait_for(1, Some(3)), Duration::from_secs(3));
        assert_eq!(p.wait_for(1, Some(600)), Duration::from_secs(64));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&fast_policy(5), None, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Transient("flaky".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let err = with_retries(&fast_policy(5), None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(LlmError::Auth("bad key".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_exhausted() {
        let calls = AtomicU32::new(0);
        let err = with_retries(&fast_policy(3), None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(LlmError::NoResponse) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, LlmError::NoResponse));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn listener_sees_each_retry() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let listener: RetryListener = Arc::new(move |attempt, max| {
            seen2.lock().unwrap().push((attempt, max));
        });
        let _ = with_retries(&fast_policy(3), Some(&listener), || async {
            Err::<(), _>(LlmError::Transient("down".into()))
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3)]);
    }
}

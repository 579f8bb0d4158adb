//! Exponential backoff with jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::CallOutcome;
use crate::config::RetrySettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// 0.2 randomizes each delay within ±20%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        (&RetrySettings::default()).into()
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            initial_backoff: Duration::from_millis(s.initial_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
            multiplier: s.multiplier.max(1.0),
            jitter: s.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// One attempt, no backoff. The sweeper's interval is its backoff.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before attempt `failed_attempts + 1`
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(32) as i32;
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// Final outcome plus how many attempts were made
#[derive(Debug, Clone)]
pub struct RetryReport<T> {
    pub outcome: CallOutcome<T>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails terminally, or attempts run out.
/// `op` receives the 1-based attempt number.
pub async fn retry_call<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryReport<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CallOutcome<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            CallOutcome::Retryable(e) if attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying call");
                tokio::time::sleep(delay).await;
            }
            outcome => {
                return RetryReport {
                    outcome,
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = no_jitter();
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(400));
        assert_eq!(p.backoff(3), Duration::from_millis(500));
        assert_eq!(p.backoff(30), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let p = RetryPolicy {
            jitter: 0.2,
            ..no_jitter()
        };
        for _ in 0..100 {
            let d = p.backoff(1);
            assert!(d >= Duration::from_millis(159) && d <= Duration::from_millis(241));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let report = retry_call(&no_jitter(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { CallOutcome::<()>::Retryable("503".into()) }
        })
        .await;

        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(report.outcome.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_is_never_retried() {
        let calls = AtomicU32::new(0);
        let report = retry_call(&no_jitter(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { CallOutcome::<()>::Terminal("400".into()) }
        })
        .await;

        assert_eq!(report.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry() {
        let report = retry_call(&no_jitter(), |attempt| async move {
            if attempt < 2 {
                CallOutcome::Retryable("timeout".into())
            } else {
                CallOutcome::Success(attempt)
            }
        })
        .await;

        assert_eq!(report.attempts, 2);
        assert_eq!(report.outcome, CallOutcome::Success(2));
    }
}

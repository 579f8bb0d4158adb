//! Resilience primitives for calls to shared remote parties.
//!
//! - [`rate_limiter`]: sliding-window admission per logical endpoint
//! - [`circuit_breaker`]: CLOSED / OPEN / HALF_OPEN fail-fast state machine
//! - [`retry`]: exponential backoff driven by [`CallOutcome`]
//!
//! Remote calls report an explicit [`CallOutcome`] instead of an error type
//! the caller has to downcast; the retry loop only ever re-runs `Retryable`.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitSnapshot, CircuitState};
pub use rate_limiter::{RateLimited, RateLimiter};
pub use retry::{RetryPolicy, RetryReport, retry_call};

/// Outcome of a single remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    Success(T),
    /// Transport error, timeout or 5xx: worth another attempt
    Retryable(String),
    /// Client-class rejection: retrying the same request cannot succeed
    Terminal(String),
}

impl<T> CallOutcome<T> {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallOutcome::Retryable(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Retryable(e) | CallOutcome::Terminal(e) => Some(e),
        }
    }
}

/// Map an HTTP status to an outcome. `5xx` is retryable, anything the
/// caller does not count as success is terminal.
pub fn classify_status(status: u16, is_success: impl Fn(u16) -> bool) -> CallOutcome<()> {
    if is_success(status) {
        CallOutcome::Success(())
    } else if (500..600).contains(&status) {
        CallOutcome::Retryable(format!("server error: HTTP {}", status))
    } else {
        CallOutcome::Terminal(format!("rejected: HTTP {}", status))
    }
}

/// Map a transport failure to an outcome
pub fn classify_transport_error(e: &reqwest::Error) -> CallOutcome<()> {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        CallOutcome::Retryable(format!("transport error: {}", e))
    } else {
        CallOutcome::Terminal(format!("request error: {}", e))
    }
}

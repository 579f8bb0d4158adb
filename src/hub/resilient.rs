//! Rate limiter + circuit breaker + retry around a [`HubClient`].
//!
//! Order of checks for every attempt:
//! 1. circuit breaker: an open circuit fails fast and spends no rate budget
//! 2. rate limiter: a full window is a "try later" signal, never a failure
//! 3. the network call, classified by [`CallOutcome`]
//!
//! Only `Retryable` outcomes are retried, with the policy's backoff.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{HubClient, UNREGISTER_ENDPOINT, UnregisterCitizen};
use crate::metrics::{HubCallKind, SagaMetrics};
use crate::resilience::{CallOutcome, CircuitBreaker, RateLimiter, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubOutcome {
    Success,
    /// Last attempt failed with a retryable error and attempts ran out
    Retryable(String),
    /// The Hub rejected the request with a client-class response
    Terminal(String),
    /// Rate budget exhausted; nothing was sent
    RateLimited { retry_after: Duration },
    /// Circuit open; nothing was sent
    CircuitOpen { retry_after: Duration },
}

impl HubOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, HubOutcome::Success)
    }

    pub fn describe(&self) -> String {
        match self {
            HubOutcome::Success => "success".to_string(),
            HubOutcome::Retryable(e) => format!("hub unavailable: {}", e),
            HubOutcome::Terminal(e) => format!("hub rejected unregister: {}", e),
            HubOutcome::RateLimited { retry_after } => {
                format!("hub rate limited, retry after {}ms", retry_after.as_millis())
            }
            HubOutcome::CircuitOpen { retry_after } => {
                format!("hub circuit open, retry after {}ms", retry_after.as_millis())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubCallReport {
    pub outcome: HubOutcome,
    /// Network calls actually made
    pub attempts: u32,
}

impl HubCallReport {
    /// Attempts that reached the Hub and did not succeed
    pub fn failed_attempts(&self) -> u32 {
        if self.outcome.is_success() {
            self.attempts.saturating_sub(1)
        } else {
            self.attempts
        }
    }
}

pub struct ResilientHub {
    client: Arc<dyn HubClient>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<SagaMetrics>,
}

impl ResilientHub {
    pub fn new(
        client: Arc<dyn HubClient>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<SagaMetrics>,
    ) -> Self {
        Self {
            client,
            limiter,
            breaker,
            metrics,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn unregister_citizen(
        &self,
        req: &UnregisterCitizen,
        policy: &RetryPolicy,
    ) -> HubCallReport {
        let mut attempts = 0u32;

        loop {
            if let Err(open) = self.breaker.try_acquire(UNREGISTER_ENDPOINT) {
                self.metrics.add_circuit_rejected();
                debug!(citizen_id = %req.id, attempts, "Hub circuit open, failing fast");
                return HubCallReport {
                    outcome: HubOutcome::CircuitOpen {
                        retry_after: open.retry_after,
                    },
                    attempts,
                };
            }

            if let Err(limited) = self.limiter.try_acquire(UNREGISTER_ENDPOINT) {
                self.breaker.release(UNREGISTER_ENDPOINT);
                self.metrics.add_rate_limited();
                debug!(citizen_id = %req.id, attempts, "Hub rate limit reached, deferring");
                return HubCallReport {
                    outcome: HubOutcome::RateLimited {
                        retry_after: limited.retry_after,
                    },
                    attempts,
                };
            }

            attempts += 1;
            match self.client.unregister_citizen(req).await {
                CallOutcome::Success(()) => {
                    self.breaker.record_success(UNREGISTER_ENDPOINT);
                    self.metrics.add_hub_call(HubCallKind::Success);
                    return HubCallReport {
                        outcome: HubOutcome::Success,
                        attempts,
                    };
                }
                CallOutcome::Terminal(e) => {
                    // the Hub answered; its health is not in question
                    self.breaker.release(UNREGISTER_ENDPOINT);
                    self.metrics.add_hub_call(HubCallKind::Terminal);
                    warn!(citizen_id = %req.id, error = %e, "Hub rejected unregister");
                    return HubCallReport {
                        outcome: HubOutcome::Terminal(e),
                        attempts,
                    };
                }
                CallOutcome::Retryable(e) => {
                    self.breaker.record_failure(UNREGISTER_ENDPOINT);
                    self.metrics.add_hub_call(HubCallKind::Retryable);
                    if attempts >= policy.max_attempts {
                        warn!(citizen_id = %req.id, attempts, error = %e, "Hub unregister retries exhausted");
                        return HubCallReport {
                            outcome: HubOutcome::Retryable(e),
                            attempts,
                        };
                    }
                    let delay = policy.backoff(attempts);
                    debug!(citizen_id = %req.id, attempts, delay_ms = delay.as_millis() as u64, error = %e, "Hub unregister failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

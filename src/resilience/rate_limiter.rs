//! Sliding-window rate limiter keyed by logical endpoint name.
//!
//! Each endpoint keeps the admission instants of the trailing window. A call
//! is admitted only while fewer than `limit` instants remain in the window;
//! a rejected call is not recorded, so the window never holds more than
//! `limit` entries.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// "Try later" signal. Not a failure of the call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after: Duration,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn try_acquire(&self, endpoint: &str) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut window = self.windows.entry(endpoint.to_string()).or_default();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit {
            let retry_after = window
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(self.window);
            debug!(endpoint, limit = self.limit, retry_after_ms = retry_after.as_millis() as u64, "Rate limit reached");
            return Err(RateLimited { retry_after });
        }

        window.push_back(now);
        Ok(())
    }

    /// Admissions recorded in the current window
    pub fn current_count(&self, endpoint: &str) -> usize {
        let now = Instant::now();
        self.windows
            .get(endpoint)
            .map(|w| {
                w.iter()
                    .filter(|&&t| now.duration_since(t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }
}

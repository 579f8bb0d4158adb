//! Named circuit breaker for fast-failing calls to an unhealthy dependency.
//!
//! ```text
//! ┌────────┐ failure_threshold ┌──────┐  open_timeout  ┌───────────┐
//! │ Closed ├──────────────────►│ Open ├───────────────►│ Half-Open │
//! └────▲───┘   consecutive     └──▲───┘                └─────┬─────┘
//!      │                          │        any failure       │
//!      │                          └──────────────────────────┤
//!      └─────────────────────────────────────────────────────┘
//!               success_threshold consecutive successes
//! ```
//!
//! Half-Open admits at most `half_open_max_calls` trial calls at a time.
//! A caller that obtained a permit but never made the call must hand it back
//! with [`CircuitBreaker::release`].

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::CircuitBreakerSettings;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        (&CircuitBreakerSettings::default()).into()
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold.max(1),
            success_threshold: s.success_threshold.max(1),
            open_timeout: Duration::from_secs(s.open_timeout_secs),
            half_open_max_calls: s.half_open_max_calls.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejection: the circuit is open (or half-open with no free trial slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            half_open_in_flight: 0,
        }
    }
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: DashMap<String, Circuit>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to call `name`. Lazily moves OPEN to HALF_OPEN
    /// once the open timeout has elapsed.
    pub fn try_acquire(&self, name: &str) -> Result<(), CircuitOpen> {
        let mut circuit = self
            .circuits
            .entry(name.to_string())
            .or_insert_with(Circuit::new);

        if circuit.state == CircuitState::Open {
            let elapsed = circuit
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(self.config.open_timeout);
            if elapsed < self.config.open_timeout {
                return Err(CircuitOpen {
                    retry_after: self.config.open_timeout - elapsed,
                });
            }
            transition(name, &mut circuit, CircuitState::HalfOpen);
        }

        match circuit.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if circuit.half_open_in_flight < self.config.half_open_max_calls => {
                circuit.half_open_in_flight += 1;
                Ok(())
            }
            _ => Err(CircuitOpen {
                retry_after: Duration::ZERO,
            }),
        }
    }

    pub fn record_success(&self, name: &str) {
        let Some(mut circuit) = self.circuits.get_mut(name) else {
            return;
        };
        match circuit.state {
            CircuitState::Closed => circuit.failure_count = 0,
            CircuitState::HalfOpen => {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
                circuit.success_count += 1;
                if circuit.success_count >= self.config.success_threshold {
                    transition(name, &mut circuit, CircuitState::Closed);
                }
            }
            // late result of a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, name: &str) {
        let Some(mut circuit) = self.circuits.get_mut(name) else {
            return;
        };
        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                if circuit.failure_count >= self.config.failure_threshold {
                    transition(name, &mut circuit, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => transition(name, &mut circuit, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Hand back an unused permit (call never made)
    pub fn release(&self, name: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(name)
            && circuit.state == CircuitState::HalfOpen
        {
            circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
        }
    }

    pub fn state(&self, name: &str) -> CircuitState {
        self.circuits
            .get(name)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<CircuitSnapshot> = self
            .circuits
            .iter()
            .map(|entry| CircuitSnapshot {
                name: entry.key().clone(),
                state: entry.state,
                failure_count: entry.failure_count,
                success_count: entry.success_count,
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

fn transition(name: &str, circuit: &mut Circuit, to: CircuitState) {
    let from = circuit.state;
    circuit.state = to;
    circuit.success_count = 0;
    circuit.half_open_in_flight = 0;
    match to {
        CircuitState::Open => {
            circuit.opened_at = Some(Instant::now());
            warn!(circuit = name, %from, %to, failures = circuit.failure_count, "Circuit opened");
        }
        CircuitState::HalfOpen => {
            info!(circuit = name, %from, %to, "Circuit half-open, admitting trial calls");
        }
        CircuitState::Closed => {
            circuit.failure_count = 0;
            circuit.opened_at = None;
            info!(circuit = name, %from, %to, "Circuit closed");
        }
    }
}

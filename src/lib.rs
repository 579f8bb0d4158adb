//! Custody Transfer - citizen hand-over between operators
//!
//! Moves a citizen from one operator to another through a saga that never
//! loses the citizen, never deletes twice under retries, and never floods
//! the shared Hub.
//!
//! # Modules
//!
//! - [`transfer`] - Saga orchestrator, transfer records, reconciliation sweeper
//! - [`idempotency`] - Idempotency guard (first writer wins, cached replays)
//! - [`lock`] - Distributed per-citizen deletion lock with owner tokens
//! - [`resilience`] - Rate limiter, circuit breaker, retry with backoff
//! - [`hub`] - Hub client behind the resilience layer
//! - [`gateway`] - HTTP API (axum) and OpenAPI docs
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] / [`logging`] / [`metrics`] - ambient plumbing

pub mod config;
pub mod coordination;
pub mod db;
pub mod gateway;
pub mod hub;
pub mod idempotency;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod resilience;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use coordination::CoordinationError;
pub use metrics::{MetricsSnapshot, SagaMetrics};
pub use transfer::{
    ReconciliationSweeper, SagaOrchestrator, SweepReport, TransferError, TransferRecord,
    TransferStatus,
};

//! Saga counters.
//!
//! Lock-free `AtomicU64` counters shared by the saga, the Hub gateway and the
//! sweeper. Read them through [`SagaMetrics::snapshot`].

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

use crate::transfer::TransferStatus;

#[derive(Debug, Default)]
pub struct SagaMetrics {
    transfers_created: AtomicU64,
    transfers_replayed: AtomicU64,
    entered_confirmed: AtomicU64,
    entered_pending_unregister: AtomicU64,
    entered_success: AtomicU64,
    entered_failed: AtomicU64,
    hub_success: AtomicU64,
    hub_retryable: AtomicU64,
    hub_terminal: AtomicU64,
    hub_attempts: AtomicU64,
    rate_limit_rejections: AtomicU64,
    circuit_open_rejections: AtomicU64,
    lock_contentions: AtomicU64,
    alerts_raised: AtomicU64,
    sweep_cycles: AtomicU64,
}

/// Which way a single Hub call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubCallKind {
    Success,
    Retryable,
    Terminal,
}

impl SagaMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_created(&self) {
        self.transfers_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_replayed(&self) {
        self.transfers_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_transition(&self, to: TransferStatus) {
        let counter = match to {
            TransferStatus::Pending => return,
            TransferStatus::Confirmed => &self.entered_confirmed,
            TransferStatus::PendingUnregister => &self.entered_pending_unregister,
            TransferStatus::Success => &self.entered_success,
            TransferStatus::Failed => &self.entered_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_hub_call(&self, kind: HubCallKind) {
        self.hub_attempts.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            HubCallKind::Success => &self.hub_success,
            HubCallKind::Retryable => &self.hub_retryable,
            HubCallKind::Terminal => &self.hub_terminal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rate_limited(&self) {
        self.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_circuit_rejected(&self) {
        self.circuit_open_rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_lock_contention(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_alert(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_sweep_cycle(&self) {
        self.sweep_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_created: self.transfers_created.load(Ordering::Relaxed),
            transfers_replayed: self.transfers_replayed.load(Ordering::Relaxed),
            entered_confirmed: self.entered_confirmed.load(Ordering::Relaxed),
            entered_pending_unregister: self.entered_pending_unregister.load(Ordering::Relaxed),
            entered_success: self.entered_success.load(Ordering::Relaxed),
            entered_failed: self.entered_failed.load(Ordering::Relaxed),
            hub_success: self.hub_success.load(Ordering::Relaxed),
            hub_retryable: self.hub_retryable.load(Ordering::Relaxed),
            hub_terminal: self.hub_terminal.load(Ordering::Relaxed),
            hub_attempts: self.hub_attempts.load(Ordering::Relaxed),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            circuit_open_rejections: self.circuit_open_rejections.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    pub transfers_created: u64,
    pub transfers_replayed: u64,
    pub entered_confirmed: u64,
    pub entered_pending_unregister: u64,
    pub entered_success: u64,
    pub entered_failed: u64,
    pub hub_success: u64,
    pub hub_retryable: u64,
    pub hub_terminal: u64,
    pub hub_attempts: u64,
    pub rate_limit_rejections: u64,
    pub circuit_open_rejections: u64,
    pub lock_contentions: u64,
    pub alerts_raised: u64,
    pub sweep_cycles: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Custody Transfer Metrics ===")?;
        writeln!(
            f,
            "Transfers: created={} replayed={}",
            self.transfers_created, self.transfers_replayed
        )?;
        writeln!(
            f,
            "Entered:   confirmed={} pending_unregister={} success={} failed={}",
            self.entered_confirmed,
            self.entered_pending_unregister,
            self.entered_success,
            self.entered_failed
        )?;
        writeln!(
            f,
            "Hub:       attempts={} success={} retryable={} terminal={}",
            self.hub_attempts, self.hub_success, self.hub_retryable, self.hub_terminal
        )?;
        writeln!(
            f,
            "Rejected:  rate_limited={} circuit_open={} lock_contention={}",
            self.rate_limit_rejections, self.circuit_open_rejections, self.lock_contentions
        )?;
        write!(
            f,
            "Sweeper:   cycles={} alerts={}",
            self.sweep_cycles, self.alerts_raised
        )
    }
}

//! Reconciliation Sweeper
//!
//! Background worker that finishes what the request path could not:
//!
//! | Pass                  | Selects                               | Action                    |
//! |-----------------------|---------------------------------------|---------------------------|
//! | escalation            | PENDING_UNREGISTER at the budget      | alert                     |
//! | unregister            | PENDING_UNREGISTER under the budget   | one Hub retry             |
//! | confirmation timeout  | outgoing PENDING older than timeout   | FAILED + compensation     |
//! | stale confirmed       | outgoing CONFIRMED, not updated       | resume deletion + Hub     |
//! | stale incoming        | incoming PENDING, not updated         | re-import and re-confirm  |
//!
//! A PENDING_UNREGISTER record with `retry_count >= max_retries` is never
//! retried again: it raises exactly one alert per cycle and waits for an
//! operator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::adapters::{Alert, AlertSink};
use super::error::TransferError;
use super::saga::SagaOrchestrator;
use super::state::TransferStatus;
use super::store::RetryBudget;
use super::types::{CancelTransfer, Direction, TransferRecord};
use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    /// Pause between cycles
    pub interval: Duration,
    /// Hub failures after which a record is escalated instead of retried
    pub max_retries: i32,
    /// Maximum records per pass
    pub batch_size: usize,
    /// How long a CONFIRMED or incoming PENDING record must sit untouched
    pub stale_threshold: Duration,
    /// Age at which an unconfirmed PENDING transfer fails
    pub confirmation_timeout: Duration,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_retries: 10,
            batch_size: 100,
            stale_threshold: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl SweeperSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweeper.interval_secs),
            max_retries: config.sweeper.max_retries,
            batch_size: config.sweeper.batch_size,
            stale_threshold: Duration::from_secs(config.sweeper.stale_threshold_secs),
            confirmation_timeout: Duration::from_secs(config.saga.confirmation_timeout_secs),
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    /// PENDING_UNREGISTER → SUCCESS
    pub unregistered: usize,
    /// Hub retried (or deferred) without success
    pub deferred: usize,
    /// Skipped because the citizen lock was held
    pub skipped: usize,
    pub alerts: usize,
    /// PENDING → FAILED on confirmation timeout
    pub expired: usize,
    /// Stale CONFIRMED records driven forward
    pub resumed: usize,
    /// Incoming records settled (CONFIRMED or FAILED)
    pub incoming_settled: usize,
    pub purged_keys: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        *self == SweepReport {
            purged_keys: self.purged_keys,
            ..Default::default()
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unregistered={} deferred={} skipped={} alerts={} expired={} resumed={} incoming={} purged={}",
            self.unregistered,
            self.deferred,
            self.skipped,
            self.alerts,
            self.expired,
            self.resumed,
            self.incoming_settled,
            self.purged_keys
        )
    }
}

pub struct ReconciliationSweeper {
    saga: Arc<SagaOrchestrator>,
    alerts: Arc<dyn AlertSink>,
    settings: SweeperSettings,
}

impl ReconciliationSweeper {
    pub fn new(
        saga: Arc<SagaOrchestrator>,
        alerts: Arc<dyn AlertSink>,
        settings: SweeperSettings,
    ) -> Self {
        Self {
            saga,
            alerts,
            settings,
        }
    }

    pub fn settings(&self) -> &SweeperSettings {
        &self.settings
    }

    /// Spawn the periodic loop. The first cycle runs immediately.
    pub fn start(self: Arc<Self>) -> SweeperHandle {
        let (shutdown, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                interval_secs = self.settings.interval.as_secs(),
                max_retries = self.settings.max_retries,
                alert_sink = self.alerts.name(),
                "Starting reconciliation sweeper"
            );

            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_cycle().await {
                            Ok(report) if report.is_quiet() => debug!("Sweep cycle: nothing to do"),
                            Ok(report) => info!(%report, "Sweep cycle finished"),
                            Err(e) => error!(error = %e, "Sweep cycle failed"),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Reconciliation sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }

    /// Run every pass once
    pub async fn run_cycle(&self) -> Result<SweepReport, TransferError> {
        let mut report = SweepReport::default();
        self.saga.metrics().add_sweep_cycle();

        self.sweep_pending_unregister(&mut report).await?;
        self.sweep_confirmation_timeouts(&mut report).await?;
        self.sweep_stale_confirmed(&mut report).await?;
        self.sweep_stale_incoming(&mut report).await?;

        match self.saga.guard().purge_expired().await {
            Ok(n) => report.purged_keys = n,
            Err(e) => warn!(error = %e, "Failed to purge expired idempotency keys"),
        }

        Ok(report)
    }

    async fn sweep_pending_unregister(&self, report: &mut SweepReport) -> Result<(), TransferError> {
        // exhausted records first: a record crossing the budget below is
        // alerted there, once
        self.alert_exhausted(report).await?;

        let records = self
            .saga
            .store()
            .find_by_retry_budget(
                TransferStatus::PendingUnregister,
                self.settings.max_retries,
                RetryBudget::Remaining,
                self.settings.batch_size,
                0,
            )
            .await?;

        for record in records {
            match self.saga.retry_unregister(&record).await {
                Ok(None) => report.skipped += 1,
                Ok(Some(updated)) if updated.status == TransferStatus::Success => {
                    report.unregistered += 1;
                }
                Ok(Some(updated)) => {
                    report.deferred += 1;
                    if updated.retry_count >= self.settings.max_retries {
                        self.raise_alert(&updated, report).await;
                    }
                }
                Err(e) => {
                    error!(transfer_id = %record.id, error = %e, "Hub unregister retry failed");
                }
            }
        }
        Ok(())
    }

    /// One alert per exhausted record, paging through all of them
    async fn alert_exhausted(&self, report: &mut SweepReport) -> Result<(), TransferError> {
        let page_size = self.settings.batch_size.max(1);
        let mut offset = 0;
        loop {
            let page = self
                .saga
                .store()
                .find_by_retry_budget(
                    TransferStatus::PendingUnregister,
                    self.settings.max_retries,
                    RetryBudget::Exhausted,
                    page_size,
                    offset,
                )
                .await?;
            for record in &page {
                self.raise_alert(record, report).await;
            }
            if page.len() < page_size {
                return Ok(());
            }
            offset += page_size;
        }
    }

    async fn sweep_confirmation_timeouts(
        &self,
        report: &mut SweepReport,
    ) -> Result<(), TransferError> {
        let cutoff = older_than(self.settings.confirmation_timeout);
        let records = self
            .saga
            .store()
            .find_stale(
                TransferStatus::Pending,
                Some(Direction::Outgoing),
                cutoff,
                self.settings.batch_size,
            )
            .await?;

        for record in records.iter().filter(|r| r.requested_at < cutoff) {
            match self.saga.expire_pending(record).await {
                Ok(true) => {
                    info!(transfer_id = %record.id, citizen_id = %record.citizen_id, "Transfer expired waiting for confirmation");
                    report.expired += 1;
                }
                Ok(false) => {}
                Err(e) => error!(transfer_id = %record.id, error = %e, "Failed to expire transfer"),
            }
        }
        Ok(())
    }

    async fn sweep_stale_confirmed(&self, report: &mut SweepReport) -> Result<(), TransferError> {
        let records = self
            .saga
            .store()
            .find_stale(
                TransferStatus::Confirmed,
                Some(Direction::Outgoing),
                older_than(self.settings.stale_threshold),
                self.settings.batch_size,
            )
            .await?;

        for record in records {
            match self.saga.resume_confirmed(&record).await {
                Ok(None) => report.skipped += 1,
                Ok(Some(updated)) => {
                    if updated.status != TransferStatus::Confirmed {
                        report.resumed += 1;
                    }
                }
                Err(e) => warn!(transfer_id = %record.id, error = %e, "Confirmed transfer still stuck"),
            }
        }
        Ok(())
    }

    async fn sweep_stale_incoming(&self, report: &mut SweepReport) -> Result<(), TransferError> {
        let records = self
            .saga
            .store()
            .find_stale(
                TransferStatus::Pending,
                Some(Direction::Incoming),
                older_than(self.settings.stale_threshold),
                self.settings.batch_size,
            )
            .await?;
        let give_up = older_than(self.settings.confirmation_timeout);

        for record in records {
            let result = if record.requested_at < give_up {
                // the source has failed this transfer by now
                let cancel = CancelTransfer {
                    citizen_id: record.citizen_id.clone(),
                    token: record.idempotency_key.clone(),
                    reason: "confirmation timeout".to_string(),
                };
                self.saga.cancel_incoming(&cancel).await.map(|_| ())
            } else {
                self.saga.complete_incoming(record.id).await.map(|_| ())
            };

            match result {
                Ok(()) => report.incoming_settled += 1,
                Err(e) if e.is_retryable() => {
                    debug!(transfer_id = %record.id, error = %e, "Incoming transfer not settled yet")
                }
                Err(e) => error!(transfer_id = %record.id, error = %e, "Incoming transfer recovery failed"),
            }
        }
        Ok(())
    }

    async fn raise_alert(&self, record: &TransferRecord, report: &mut SweepReport) {
        let alert = Alert {
            transfer_id: record.id.to_string(),
            citizen_id: record.citizen_id.clone(),
            retry_count: record.retry_count,
            message: format!(
                "Hub unregister not confirmed after {} failed attempts; manual resolution required (last error: {})",
                record.retry_count,
                record.error_message.as_deref().unwrap_or("none")
            ),
        };
        self.alerts.raise(&alert).await;
        self.saga.metrics().add_alert();
        report.alerts += 1;
    }
}

/// Stops the sweeper task
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal shutdown and wait for the current cycle to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Sweeper task panicked");
        }
    }
}

fn older_than(age: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

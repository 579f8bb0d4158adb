//! Transfer Record Store
//!
//! Durable home of every [`TransferRecord`]. All status changes are
//! compare-and-swap on the current status: a writer that lost a race sees
//! `Ok(false)` and must re-read before deciding anything.

pub mod memory;
pub mod pg;

pub use memory::MemoryTransferStore;
pub use pg::PgTransferStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::TransferError;
use super::state::TransferStatus;
use super::types::{Direction, TransferId, TransferRecord};

/// Split of records by `retry_count` against a retry limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    /// `retry_count < max_retries`
    Remaining,
    /// `retry_count >= max_retries`
    Exhausted,
}

impl RetryBudget {
    pub fn admits(self, retry_count: i32, max_retries: i32) -> bool {
        match self {
            RetryBudget::Remaining => retry_count < max_retries,
            RetryBudget::Exhausted => retry_count >= max_retries,
        }
    }
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new record. A second record for the same idempotency key
    /// is rejected with `IdempotencyConflict`.
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError>;

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, TransferError>;

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<TransferRecord>, TransferError>;

    /// Outgoing record of `citizen_id` created under `key`
    async fn find_outgoing(
        &self,
        citizen_id: &str,
        key: &str,
    ) -> Result<Option<TransferRecord>, TransferError>;

    /// CAS status update. Entering CONFIRMED stamps `confirmed_at`,
    /// entering SUCCESS stamps `unregistered_at`/`completed_at` and clears
    /// the last error.
    async fn update_status_if(
        &self,
        id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
    ) -> Result<bool, TransferError>;

    /// CAS status update that also records why
    async fn update_status_with_error(
        &self,
        id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
        error: &str,
    ) -> Result<bool, TransferError>;

    /// Store the last error without changing status
    async fn record_error(&self, id: TransferId, error: &str) -> Result<(), TransferError>;

    /// Add `by` failed Hub attempts, returning the new total
    async fn increment_retry(
        &self,
        id: TransferId,
        by: i32,
        error: &str,
    ) -> Result<i32, TransferError>;

    /// Records in `status` on one side of `max_retries`, oldest update
    /// first (ties by id), skipping `offset` rows
    async fn find_by_retry_budget(
        &self,
        status: TransferStatus,
        max_retries: i32,
        budget: RetryBudget,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;

    /// Records in `status` not touched since `updated_before`
    async fn find_stale(
        &self,
        status: TransferStatus,
        direction: Option<Direction>,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;

    async fn count_by_status(&self) -> Result<Vec<(TransferStatus, i64)>, TransferError>;
}

pub(crate) fn check_transition(
    id: TransferId,
    expected: TransferStatus,
    new: TransferStatus,
) -> Result<(), TransferError> {
    if expected.can_transition_to(new) {
        Ok(())
    } else {
        Err(TransferError::InvalidStateTransition(format!(
            "{}: {} -> {}",
            id, expected, new
        )))
    }
}

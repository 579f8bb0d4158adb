//! In-process transfer store.
//!
//! Used when no PostgreSQL URL is configured and by tests. Each CAS runs
//! under the `DashMap` shard lock of the record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{RetryBudget, TransferStore, check_transition};
use crate::transfer::error::TransferError;
use crate::transfer::state::TransferStatus;
use crate::transfer::types::{Direction, TransferId, TransferRecord};

#[derive(Debug, Default)]
pub struct MemoryTransferStore {
    records: DashMap<TransferId, TransferRecord>,
    by_key: DashMap<String, TransferId>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn apply_transition(record: &mut TransferRecord, new: TransferStatus) {
        let now = Utc::now();
        record.status = new;
        record.updated_at = now;
        match new {
            TransferStatus::Confirmed => {
                record.confirmed_at.get_or_insert(now);
            }
            TransferStatus::Success => {
                record.unregistered_at = Some(now);
                record.completed_at = Some(now);
                record.error_message = None;
            }
            _ => {}
        }
    }

    fn sorted(records: Vec<TransferRecord>, limit: usize) -> Vec<TransferRecord> {
        Self::page(records, limit, 0)
    }

    fn page(mut records: Vec<TransferRecord>, limit: usize, offset: usize) -> Vec<TransferRecord> {
        records.sort_by_key(|r| (r.updated_at, r.id));
        records.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError> {
        match self.by_key.entry(record.idempotency_key.clone()) {
            Entry::Occupied(_) => Err(TransferError::IdempotencyConflict(
                record.idempotency_key.clone(),
            )),
            Entry::Vacant(vacant) => {
                self.records.insert(record.id, record.clone());
                vacant.insert(record.id);
                Ok(())
            }
        }
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, TransferError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<TransferRecord>, TransferError> {
        let Some(id) = self.by_key.get(key).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn find_outgoing(
        &self,
        citizen_id: &str,
        key: &str,
    ) -> Result<Option<TransferRecord>, TransferError> {
        Ok(self
            .get_by_idempotency_key(key)
            .await?
            .filter(|r| r.direction == Direction::Outgoing && r.citizen_id == citizen_id))
    }

    async fn update_status_if(
        &self,
        id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
    ) -> Result<bool, TransferError> {
        check_transition(id, expected, new)?;
        match self.records.get_mut(&id) {
            Some(mut record) if record.status == expected => {
                Self::apply_transition(&mut record, new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status_with_error(
        &self,
        id: TransferId,
        expected: TransferStatus,
        new: TransferStatus,
        error: &str,
    ) -> Result<bool, TransferError> {
        check_transition(id, expected, new)?;
        match self.records.get_mut(&id) {
            Some(mut record) if record.status == expected => {
                Self::apply_transition(&mut record, new);
                record.error_message = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_error(&self, id: TransferId, error: &str) -> Result<(), TransferError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))?;
        record.error_message = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retry(
        &self,
        id: TransferId,
        by: i32,
        error: &str,
    ) -> Result<i32, TransferError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))?;
        record.retry_count = record.retry_count.saturating_add(by);
        record.error_message = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(record.retry_count)
    }

    async fn find_by_retry_budget(
        &self,
        status: TransferStatus,
        max_retries: i32,
        budget: RetryBudget,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let matching = self
            .records
            .iter()
            .filter(|r| r.status == status && budget.admits(r.retry_count, max_retries))
            .map(|r| r.clone())
            .collect();
        Ok(Self::page(matching, limit, offset))
    }

    async fn find_stale(
        &self,
        status: TransferStatus,
        direction: Option<Direction>,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let matching = self
            .records
            .iter()
            .filter(|r| {
                r.status == status
                    && direction.is_none_or(|d| r.direction == d)
                    && r.updated_at < updated_before
            })
            .map(|r| r.clone())
            .collect();
        Ok(Self::sorted(matching, limit))
    }

    async fn count_by_status(&self) -> Result<Vec<(TransferStatus, i64)>, TransferError> {
        Ok(TransferStatus::ALL
            .iter()
            .map(|status| {
                let n = self.records.iter().filter(|r| r.status == *status).count();
                (*status, n as i64)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::{InitiateTransfer, OperatorIdentity};

    fn record(key: &str) -> TransferRecord {
        let req = InitiateTransfer {
            citizen_id: "C1".into(),
            destination_operator_id: "op-b".into(),
            destination_operator_name: "Operator B".into(),
            destination_url: "https://op-b.example".into(),
        };
        let us = OperatorIdentity {
            id: "op-a".into(),
            name: "Operator A".into(),
        };
        TransferRecord::outgoing(key, &req, "Ada", "ada@example.com", vec!["doc-1".into()], &us)
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_key() {
        let store = MemoryTransferStore::new();
        store.create(&record("K1")).await.unwrap();
        let err = store.create(&record("K1")).await.unwrap_err();
        assert!(matches!(err, TransferError::IdempotencyConflict(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cas_transition() {
        let store = MemoryTransferStore::new();
        let r = record("K1");
        store.create(&r).await.unwrap();

        assert!(
            store
                .update_status_if(r.id, TransferStatus::Pending, TransferStatus::Confirmed)
                .await
                .unwrap()
        );
        // lost race: expected status no longer current
        assert!(
            !store
                .update_status_if(r.id, TransferStatus::Pending, TransferStatus::Failed)
                .await
                .unwrap()
        );

        let confirmed = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(confirmed.status, TransferStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let store = MemoryTransferStore::new();
        let r = record("K1");
        store.create(&r).await.unwrap();
        let err = store
            .update_status_if(r.id, TransferStatus::PendingUnregister, TransferStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_success_stamps_and_clears_error() {
        let store = MemoryTransferStore::new();
        let r = record("K1");
        store.create(&r).await.unwrap();
        store
            .update_status_if(r.id, TransferStatus::Pending, TransferStatus::Confirmed)
            .await
            .unwrap();
        store
            .update_status_if(r.id, TransferStatus::Confirmed, TransferStatus::PendingUnregister)
            .await
            .unwrap();
        assert_eq!(store.increment_retry(r.id, 3, "hub 503").await.unwrap(), 3);
        store
            .update_status_if(r.id, TransferStatus::PendingUnregister, TransferStatus::Success)
            .await
            .unwrap();

        let done = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(done.retry_count, 3);
        assert!(done.unregistered_at.is_some());
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_find_outgoing_and_stale() {
        let store = MemoryTransferStore::new();
        let r = record("K1");
        store.create(&r).await.unwrap();

        assert!(store.find_outgoing("C1", "K1").await.unwrap().is_some());
        assert!(store.find_outgoing("C2", "K1").await.unwrap().is_none());

        let later = Utc::now() + chrono::Duration::seconds(1);
        let stale = store
            .find_stale(TransferStatus::Pending, Some(Direction::Outgoing), later, 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        let stale = store
            .find_stale(TransferStatus::Pending, Some(Direction::Incoming), later, 10)
            .await
            .unwrap();
        assert!(stale.is_empty());

        let counts = store.count_by_status().await.unwrap();
        assert!(counts.contains(&(TransferStatus::Pending, 1)));
    }

    #[tokio::test]
    async fn test_find_by_retry_budget_splits_and_pages() {
        let store = MemoryTransferStore::new();
        let mut ids = Vec::new();
        for key in ["K1", "K2", "K3"] {
            let r = record(key);
            store.create(&r).await.unwrap();
            store
                .update_status_if(r.id, TransferStatus::Pending, TransferStatus::Confirmed)
                .await
                .unwrap();
            store
                .update_status_if(r.id, TransferStatus::Confirmed, TransferStatus::PendingUnregister)
                .await
                .unwrap();
            ids.push(r.id);
        }
        // K1 and K2 exhausted, K3 still has budget
        store.increment_retry(ids[0], 10, "hub 503").await.unwrap();
        store.increment_retry(ids[1], 12, "hub 503").await.unwrap();
        store.increment_retry(ids[2], 2, "hub 503").await.unwrap();

        let remaining = store
            .find_by_retry_budget(TransferStatus::PendingUnregister, 10, RetryBudget::Remaining, 1, 0)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[2]);

        let first = store
            .find_by_retry_budget(TransferStatus::PendingUnregister, 10, RetryBudget::Exhausted, 1, 0)
            .await
            .unwrap();
        let second = store
            .find_by_retry_budget(TransferStatus::PendingUnregister, 10, RetryBudget::Exhausted, 1, 1)
            .await
            .unwrap();
        let third = store
            .find_by_retry_budget(TransferStatus::PendingUnregister, 10, RetryBudget::Exhausted, 1, 2)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].id, second[0].id);
        assert!(third.is_empty());
    }
}

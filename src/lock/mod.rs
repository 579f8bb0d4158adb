//! Distributed Lock Manager
//!
//! Per-resource leases used to serialize destructive work on one citizen.
//! A lease is identified by the `owner_token` handed out at acquisition;
//! `release` and `extend` are compare-and-act on that token, so a holder
//! whose lease already expired can never touch the next holder's lease.
//!
//! The TTL only protects against crashed holders. Callers release
//! explicitly on every path.

pub mod memory;
pub mod pg;

pub use memory::MemoryLockManager;
pub use pg::PgLockManager;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use crate::coordination::CoordinationError;

/// A held lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub resource_key: String,
    pub owner_token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Non-blocking acquisition. `None` when another owner holds a live lease.
    async fn acquire(
        &self,
        resource_key: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, CoordinationError>;

    /// Delete the lease only if `owner_token` still owns it.
    async fn release(&self, resource_key: &str, owner_token: &str)
    -> Result<bool, CoordinationError>;

    /// Reset the lease to expire `additional_ttl` from now, only if
    /// `owner_token` still holds a live lease.
    async fn extend(
        &self,
        resource_key: &str,
        owner_token: &str,
        additional_ttl: Duration,
    ) -> Result<bool, CoordinationError>;
}

/// Lock key serializing deletion of one citizen's local data
pub fn deletion_lock_key(citizen_id: &str) -> String {
    format!("delete:{}", citizen_id)
}

pub(crate) fn new_owner_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(25);
const MAX_BACKOFF: Duration = Duration::from_millis(400);

/// Bounded-blocking acquisition: retry with exponential backoff until
/// `max_wait` elapses. A zero `max_wait` makes exactly one attempt.
pub async fn acquire_with_backoff(
    locks: &dyn DistributedLock,
    resource_key: &str,
    ttl: Duration,
    max_wait: Duration,
) -> Result<Option<LockHandle>, CoordinationError> {
    let deadline = tokio::time::Instant::now() + max_wait;
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(handle) = locks.acquire(resource_key, ttl).await? {
            return Ok(Some(handle));
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            debug!(resource_key, attempts, "Lock still contended after max wait");
            return Ok(None);
        }

        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deletion_lock_key() {
        assert_eq!(deletion_lock_key("C1"), "delete:C1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_acquires_after_holder_releases() {
        let locks = std::sync::Arc::new(MemoryLockManager::new());
        let held = locks
            .acquire("delete:C1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let releaser = {
            let locks = locks.clone();
            let token = held.owner_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                locks.release("delete:C1", &token).await.unwrap()
            })
        };

        let acquired = acquire_with_backoff(
            locks.as_ref(),
            "delete:C1",
            Duration::from_secs(60),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert!(releaser.await.unwrap());
        let acquired = acquired.expect("lock acquired once released");
        assert_ne!(acquired.owner_token, held.owner_token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_gives_up_at_deadline() {
        let locks = MemoryLockManager::new();
        locks
            .acquire("delete:C1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let started = tokio::time::Instant::now();
        let acquired = acquire_with_backoff(
            &locks,
            "delete:C1",
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
        .await
        .unwrap();

        assert!(acquired.is_none());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

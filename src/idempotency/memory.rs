//! In-process idempotency guard backed by `DashMap`.
//!
//! `DashMap::entry` holds the shard write lock for the whole
//! check-and-insert, which is what makes `register` atomic.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;

use super::{IdempotencyGuard, RegisterOutcome};
use crate::coordination::CoordinationError;

#[derive(Debug, Clone)]
struct GuardEntry {
    expires_at: Instant,
    cached_result: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryIdempotencyGuard {
    entries: DashMap<String, GuardEntry>,
}

impl MemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryIdempotencyGuard {
    async fn register(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<RegisterOutcome, CoordinationError> {
        let now = Instant::now();
        let fresh = GuardEntry {
            expires_at: now + ttl,
            cached_result: None,
        };

        let outcome = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.insert(fresh);
                    RegisterOutcome::Accepted
                } else {
                    RegisterOutcome::AlreadyExists(occupied.get().cached_result.clone())
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                RegisterOutcome::Accepted
            }
        };
        Ok(outcome)
    }

    async fn complete(&self, key: &str, result: &str) -> Result<(), CoordinationError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.cached_result = Some(result.to_string());
        }
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), CoordinationError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CoordinationError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_register_sees_cached_result() {
        let guard = MemoryIdempotencyGuard::new();
        let ttl = Duration::from_secs(900);

        assert_eq!(guard.register("k", ttl).await.unwrap(), RegisterOutcome::Accepted);
        assert_eq!(
            guard.register("k", ttl).await.unwrap(),
            RegisterOutcome::AlreadyExists(None)
        );

        guard.complete("k", "01HTRANSFER").await.unwrap();
        assert_eq!(
            guard.register("k", ttl).await.unwrap(),
            RegisterOutcome::AlreadyExists(Some("01HTRANSFER".to_string()))
        );
    }

    #[tokio::test]
    async fn test_concurrent_register_single_winner() {
        let guard = Arc::new(MemoryIdempotencyGuard::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .register("same-key", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }

        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap().is_accepted() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_is_reclaimable() {
        let guard = MemoryIdempotencyGuard::new();
        let ttl = Duration::from_secs(10);
        guard.register("k", ttl).await.unwrap();
        guard.complete("k", "old").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(guard.register("k", ttl).await.unwrap(), RegisterOutcome::Accepted);
        assert_eq!(
            guard.register("k", ttl).await.unwrap(),
            RegisterOutcome::AlreadyExists(None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_forget() {
        let guard = MemoryIdempotencyGuard::new();
        guard.register("short", Duration::from_secs(1)).await.unwrap();
        guard.register("long", Duration::from_secs(100)).await.unwrap();
        guard.register("gone", Duration::from_secs(100)).await.unwrap();

        guard.forget("gone").await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(guard.purge_expired().await.unwrap(), 1);
        assert_eq!(guard.len(), 1);
        assert!(guard.register("gone", Duration::from_secs(1)).await.unwrap().is_accepted());
    }
}

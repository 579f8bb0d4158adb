//! In-process lock manager backed by `DashMap`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;

use super::{DistributedLock, LockHandle, new_owner_token};
use crate::coordination::CoordinationError;

#[derive(Debug, Clone)]
struct Lease {
    owner_token: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryLockManager {
    leases: DashMap<String, Lease>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live holder, if any
    pub fn holder(&self, resource_key: &str) -> Option<String> {
        let now = Instant::now();
        self.leases
            .get(resource_key)
            .filter(|l| l.expires_at > now)
            .map(|l| l.owner_token.clone())
    }
}

fn handle_for(resource_key: &str, lease: &Lease) -> LockHandle {
    let remaining = lease.expires_at.saturating_duration_since(Instant::now());
    LockHandle {
        resource_key: resource_key.to_string(),
        owner_token: lease.owner_token.clone(),
        expires_at: Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero()),
    }
}

#[async_trait]
impl DistributedLock for MemoryLockManager {
    async fn acquire(
        &self,
        resource_key: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, CoordinationError> {
        let now = Instant::now();
        let lease = Lease {
            owner_token: new_owner_token(),
            expires_at: now + ttl,
        };

        match self.leases.entry(resource_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return Ok(None);
                }
                let handle = handle_for(resource_key, &lease);
                occupied.insert(lease);
                Ok(Some(handle))
            }
            Entry::Vacant(vacant) => {
                let handle = handle_for(resource_key, &lease);
                vacant.insert(lease);
                Ok(Some(handle))
            }
        }
    }

    async fn release(
        &self,
        resource_key: &str,
        owner_token: &str,
    ) -> Result<bool, CoordinationError> {
        Ok(self
            .leases
            .remove_if(resource_key, |_, lease| lease.owner_token == owner_token)
            .is_some())
    }

    async fn extend(
        &self,
        resource_key: &str,
        owner_token: &str,
        additional_ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let now = Instant::now();
        match self.leases.get_mut(resource_key) {
            Some(mut lease) if lease.owner_token == owner_token && lease.expires_at > now => {
                lease.expires_at = now + additional_ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

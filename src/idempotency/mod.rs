//! Idempotency Guard
//!
//! Deduplicates retried inbound requests. The first caller to `register` a
//! key wins (`Accepted`); every later caller inside the TTL observes
//! `AlreadyExists` together with whatever result the winner cached via
//! `complete`.
//!
//! Keys are namespaced so creation and confirmation never collide:
//! - `xfer:idemp:{Idempotency-Key}` for transfer creation
//! - `xfer:confirm:{token}` for confirmation callbacks

pub mod memory;
pub mod pg;

pub use memory::MemoryIdempotencyGuard;
pub use pg::PgIdempotencyGuard;

use async_trait::async_trait;
use std::time::Duration;

use crate::coordination::CoordinationError;

/// Result of registering a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// This caller owns the key and must perform the guarded operation
    Accepted,
    /// Key already seen; carries the cached result if the owner finished
    AlreadyExists(Option<String>),
}

impl RegisterOutcome {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, RegisterOutcome::Accepted)
    }
}

#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Atomically claim `key` for `ttl`. Expired entries are reclaimable.
    async fn register(&self, key: &str, ttl: Duration)
    -> Result<RegisterOutcome, CoordinationError>;

    /// Cache the outcome of the guarded operation under an existing key.
    async fn complete(&self, key: &str, result: &str) -> Result<(), CoordinationError>;

    /// Drop a key whose operation failed before any side effect.
    async fn forget(&self, key: &str) -> Result<(), CoordinationError>;

    /// Remove expired entries, returning how many were dropped.
    async fn purge_expired(&self) -> Result<usize, CoordinationError>;
}

pub fn creation_key(idempotency_key: &str) -> String {
    format!("xfer:idemp:{}", idempotency_key)
}

pub fn confirmation_key(token: &str) -> String {
    format!("xfer:confirm:{}", token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces_differ() {
        assert_eq!(creation_key("k1"), "xfer:idemp:k1");
        assert_eq!(confirmation_key("k1"), "xfer:confirm:k1");
        assert_ne!(creation_key("k1"), confirmation_key("k1"));
    }
}

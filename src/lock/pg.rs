//! PostgreSQL lease table.
//!
//! Acquisition is an upsert that only replaces an expired lease; release is
//! a `DELETE ... WHERE owner_token = $2`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

use super::{DistributedLock, LockHandle, new_owner_token};
use crate::coordination::{CoordinationError, duration_millis};

pub struct PgLockManager {
    pool: PgPool,
}

impl PgLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DistributedLock for PgLockManager {
    async fn acquire(
        &self,
        resource_key: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, CoordinationError> {
        let owner_token = new_owner_token();
        let expires_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            INSERT INTO custody_locks_tb (resource_key, owner_token, expires_at)
            VALUES ($1, $2, NOW() + INTERVAL '1 millisecond' * $3)
            ON CONFLICT (resource_key) DO UPDATE
                SET owner_token = EXCLUDED.owner_token,
                    expires_at = EXCLUDED.expires_at
                WHERE custody_locks_tb.expires_at <= NOW()
            RETURNING expires_at
            "#,
        )
        .bind(resource_key)
        .bind(&owner_token)
        .bind(duration_millis(ttl))
        .fetch_optional(&self.pool)
        .await?;

        Ok(expires_at.map(|expires_at| LockHandle {
            resource_key: resource_key.to_string(),
            owner_token,
            expires_at,
        }))
    }

    async fn release(
        &self,
        resource_key: &str,
        owner_token: &str,
    ) -> Result<bool, CoordinationError> {
        let result =
            sqlx::query("DELETE FROM custody_locks_tb WHERE resource_key = $1 AND owner_token = $2")
                .bind(resource_key)
                .bind(owner_token)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn extend(
        &self,
        resource_key: &str,
        owner_token: &str,
        additional_ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let result = sqlx::query(
            r#"
            UPDATE custody_locks_tb
            SET expires_at = NOW() + INTERVAL '1 millisecond' * $3
            WHERE resource_key = $1 AND owner_token = $2 AND expires_at > NOW()
            "#,
        )
        .bind(resource_key)
        .bind(owner_token)
        .bind(duration_millis(additional_ttl))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

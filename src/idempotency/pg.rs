//! PostgreSQL idempotency guard.
//!
//! Claiming is a single upsert that only overwrites an expired row, so two
//! concurrent inserts of the same key cannot both see `RETURNING` output.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;

use super::{IdempotencyGuard, RegisterOutcome};
use crate::coordination::{CoordinationError, duration_millis};

pub struct PgIdempotencyGuard {
    pool: PgPool,
}

impl PgIdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyGuard for PgIdempotencyGuard {
    async fn register(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<RegisterOutcome, CoordinationError> {
        let claimed = sqlx::query(
            r#"
            INSERT INTO idempotency_keys_tb (idem_key, cached_result, expires_at, created_at)
            VALUES ($1, NULL, NOW() + INTERVAL '1 millisecond' * $2, NOW())
            ON CONFLICT (idem_key) DO UPDATE
                SET cached_result = NULL,
                    expires_at = EXCLUDED.expires_at,
                    created_at = NOW()
                WHERE idempotency_keys_tb.expires_at <= NOW()
            RETURNING idem_key
            "#,
        )
        .bind(key)
        .bind(duration_millis(ttl))
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(RegisterOutcome::Accepted);
        }

        let cached = sqlx::query("SELECT cached_result FROM idempotency_keys_tb WHERE idem_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .and_then(|row| row.get::<Option<String>, _>("cached_result"));

        Ok(RegisterOutcome::AlreadyExists(cached))
    }

    async fn complete(&self, key: &str, result: &str) -> Result<(), CoordinationError> {
        sqlx::query("UPDATE idempotency_keys_tb SET cached_result = $2 WHERE idem_key = $1")
            .bind(key)
            .bind(result)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), CoordinationError> {
        sqlx::query("DELETE FROM idempotency_keys_tb WHERE idem_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CoordinationError> {
        let result = sqlx::query("DELETE FROM idempotency_keys_tb WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

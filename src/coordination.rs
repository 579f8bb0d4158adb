//! Shared error type for the coordination stores (locks, idempotency keys).

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CoordinationError {
    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
}

impl CoordinationError {
    pub fn code(&self) -> &'static str {
        match self {
            CoordinationError::Store(_) => "COORDINATION_STORE_ERROR",
            CoordinationError::Unavailable(_) => "COORDINATION_UNAVAILABLE",
        }
    }
}

impl From<sqlx::Error> for CoordinationError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                CoordinationError::Unavailable(e.to_string())
            }
            other => CoordinationError::Store(other.to_string()),
        }
    }
}

/// Milliseconds of a duration as the `BIGINT` bound into interval arithmetic.
pub(crate) fn duration_millis(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

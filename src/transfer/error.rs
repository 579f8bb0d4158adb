//! Transfer Error Types

use thiserror::Error;

use crate::coordination::CoordinationError;

/// Saga error types
///
/// Only failures before local deletion reach a peer as an error. After
/// deletion the saga reports success and parks the record for retry.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Idempotency-Key header is required")]
    MissingIdempotencyKey,

    #[error("Idempotency-Key must be a UUID: {0}")]
    InvalidIdempotencyKey(String),

    // === Idempotency Errors ===
    #[error("Idempotency key reused with a different payload: {0}")]
    IdempotencyConflict(String),

    #[error("A request with this idempotency key is still in progress")]
    RequestInProgress,

    // === Lookup Errors ===
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Citizen not found: {0}")]
    CitizenNotFound(String),

    // === State Errors ===
    #[error("Transfer already failed: {0}")]
    TransferAlreadyFailed(String),

    #[error("Transfer can no longer be cancelled: {0}")]
    PastPointOfNoReturn(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Retryable Errors ===
    #[error("Citizen is locked by another transfer operation: {0}")]
    LockContention(String),

    #[error("Local deletion failed: {0}")]
    DeletionFailed(String),

    // === Peer Errors ===
    #[error("Destination operator rejected the transfer: {0}")]
    PeerRejected(String),

    #[error("Destination operator unavailable: {0}")]
    PeerUnavailable(String),

    // === System Errors ===
    #[error("Document service error: {0}")]
    DocumentError(String),

    #[error("Coordination store error: {0}")]
    CoordinationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            TransferError::InvalidIdempotencyKey(_) => "INVALID_IDEMPOTENCY_KEY",
            TransferError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            TransferError::RequestInProgress => "REQUEST_IN_PROGRESS",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::CitizenNotFound(_) => "CITIZEN_NOT_FOUND",
            TransferError::TransferAlreadyFailed(_) => "TRANSFER_ALREADY_FAILED",
            TransferError::PastPointOfNoReturn(_) => "PAST_POINT_OF_NO_RETURN",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TransferError::LockContention(_) => "LOCK_CONTENTION",
            TransferError::DeletionFailed(_) => "DELETION_FAILED",
            TransferError::PeerRejected(_) => "PEER_REJECTED",
            TransferError::PeerUnavailable(_) => "PEER_UNAVAILABLE",
            TransferError::DocumentError(_) => "DOCUMENT_ERROR",
            TransferError::CoordinationError(_) => "COORDINATION_ERROR",
            TransferError::DatabaseError(_) => "DATABASE_ERROR",
            TransferError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidRequest(_)
            | TransferError::MissingIdempotencyKey
            | TransferError::InvalidIdempotencyKey(_) => 400,
            TransferError::TransferNotFound(_) | TransferError::CitizenNotFound(_) => 404,
            TransferError::IdempotencyConflict(_)
            | TransferError::RequestInProgress
            | TransferError::TransferAlreadyFailed(_)
            | TransferError::PastPointOfNoReturn(_) => 409,
            TransferError::PeerRejected(_) => 502,
            TransferError::LockContention(_)
            | TransferError::DeletionFailed(_)
            | TransferError::PeerUnavailable(_)
            | TransferError::CoordinationError(_) => 503,
            TransferError::InvalidStateTransition(_)
            | TransferError::DocumentError(_)
            | TransferError::DatabaseError(_)
            | TransferError::SystemError(_) => 500,
        }
    }

    /// The caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        self.http_status() == 503
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::DatabaseError(e.to_string())
    }
}

impl From<anyhow::Error> for TransferError {
    fn from(e: anyhow::Error) -> Self {
        TransferError::SystemError(e.to_string())
    }
}

impl From<CoordinationError> for TransferError {
    fn from(e: CoordinationError) -> Self {
        TransferError::CoordinationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TransferError::IdempotencyConflict("K1".into()).code(),
            "IDEMPOTENCY_CONFLICT"
        );
        assert_eq!(TransferError::LockContention("C1".into()).code(), "LOCK_CONTENTION");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(TransferError::MissingIdempotencyKey.http_status(), 400);
        assert_eq!(TransferError::TransferNotFound("x".into()).http_status(), 404);
        assert_eq!(TransferError::IdempotencyConflict("x".into()).http_status(), 409);
        assert_eq!(TransferError::LockContention("C1".into()).http_status(), 503);
        assert_eq!(TransferError::SystemError("test".into()).http_status(), 500);
    }

    #[test]
    fn test_retryable() {
        assert!(TransferError::LockContention("C1".into()).is_retryable());
        assert!(TransferError::DeletionFailed("io".into()).is_retryable());
        assert!(!TransferError::TransferNotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_from_coordination_error() {
        let err: TransferError = CoordinationError::Unavailable("pool".into()).into();
        assert_eq!(err.http_status(), 503);
    }
}

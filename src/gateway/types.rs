//! API response envelope, error mapping and response DTOs

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::metrics::MetricsSnapshot;
use crate::resilience::CircuitSnapshot;
use crate::transfer::adapters::peer::IDEMPOTENCY_KEY_HEADER;
use crate::transfer::{SagaResult, TransferError, TransferRecord};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, absent on error
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "ok")]
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Standard API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const MISSING_IDEMPOTENCY_KEY: i32 = 1002;
    pub const INVALID_IDEMPOTENCY_KEY: i32 = 1003;

    // Conflicts (3xxx)
    pub const IDEMPOTENCY_CONFLICT: i32 = 3001;
    pub const REQUEST_IN_PROGRESS: i32 = 3002;
    pub const TRANSFER_ALREADY_FAILED: i32 = 3003;
    pub const PAST_POINT_OF_NO_RETURN: i32 = 3004;

    // Resource errors (4xxx)
    pub const TRANSFER_NOT_FOUND: i32 = 4001;
    pub const CITIZEN_NOT_FOUND: i32 = 4002;
    pub const DOCUMENT_NOT_FOUND: i32 = 4003;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const PEER_REJECTED: i32 = 5002;
}

// ============================================================================
// Errors
// ============================================================================

/// Error rendered as `{code, msg}` with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn not_found(code: i32, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        use error_codes::*;

        let code = match &e {
            TransferError::InvalidRequest(_) => INVALID_PARAMETER,
            TransferError::MissingIdempotencyKey => MISSING_IDEMPOTENCY_KEY,
            TransferError::InvalidIdempotencyKey(_) => INVALID_IDEMPOTENCY_KEY,
            TransferError::IdempotencyConflict(_) => IDEMPOTENCY_CONFLICT,
            TransferError::RequestInProgress => REQUEST_IN_PROGRESS,
            TransferError::TransferAlreadyFailed(_) => TRANSFER_ALREADY_FAILED,
            TransferError::PastPointOfNoReturn(_) => PAST_POINT_OF_NO_RETURN,
            TransferError::TransferNotFound(_) => TRANSFER_NOT_FOUND,
            TransferError::CitizenNotFound(_) => CITIZEN_NOT_FOUND,
            TransferError::PeerRejected(_) => PEER_REJECTED,
            e if e.is_retryable() => SERVICE_UNAVAILABLE,
            _ => INTERNAL_ERROR,
        };
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::warn!(error_code = e.code(), error = %e, "Transfer request failed");
        }

        Self::new(status, code, e.to_string())
    }
}

/// 200 with data
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// 201 with data
pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

/// Run `validator` rules, mapping failures to 400
pub fn validate_body<T: Validate>(body: &T) -> Result<(), ApiError> {
    body.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// `Idempotency-Key` header value; empty when absent so the saga reports
/// it as missing
pub fn idempotency_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        None => Ok(""),
        Some(value) => value.to_str().map(str::trim).map_err(|_| {
            ApiError::from(TransferError::InvalidIdempotencyKey(
                "header is not valid ASCII".to_string(),
            ))
        }),
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Result of accepting or initiating a transfer
#[derive(Debug, Serialize, ToSchema)]
pub struct TransferCreatedData {
    #[schema(example = "01J9Z6Q4W8X5N3K2M1P0R7S6T5")]
    pub transfer_id: String,
    #[schema(example = "pending")]
    pub status: String,
    /// True when the idempotency key was already used for this request
    pub replayed: bool,
}

impl From<&SagaResult> for TransferCreatedData {
    fn from(result: &SagaResult) -> Self {
        let record = result.record();
        Self {
            transfer_id: record.id.to_string(),
            status: record.status.as_api_str().to_string(),
            replayed: result.is_replay(),
        }
    }
}

/// Human-readable outcome of a confirm or cancel callback
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageData {
    #[schema(example = "Citizen C1 transferred: local data deleted and unregistered from Hub")]
    pub message: String,
}

/// Transfer record as exposed over the API
#[derive(Debug, Serialize, ToSchema)]
pub struct TransferView {
    pub transfer_id: String,
    pub citizen_id: String,
    #[schema(example = "outgoing")]
    pub direction: String,
    pub source_operator_id: String,
    pub destination_operator_id: String,
    #[schema(example = "PENDING_UNREGISTER")]
    pub status: String,
    pub document_ids: Vec<String>,
    pub retry_count: i32,
    pub requested_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub unregistered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TransferRecord> for TransferView {
    fn from(r: &TransferRecord) -> Self {
        Self {
            transfer_id: r.id.to_string(),
            citizen_id: r.citizen_id.clone(),
            direction: r.direction.as_str().to_string(),
            source_operator_id: r.source_operator_id.clone(),
            destination_operator_id: r.destination_operator_id.clone(),
            status: r.status.as_str().to_string(),
            document_ids: r.document_refs.clone(),
            retry_count: r.retry_count,
            requested_at: r.requested_at,
            confirmed_at: r.confirmed_at,
            unregistered_at: r.unregistered_at,
            completed_at: r.completed_at,
            error_message: r.error_message.clone(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusCount {
    #[schema(example = "PENDING")]
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RateLimiterUsage {
    pub endpoint: String,
    pub limit_per_minute: usize,
    pub current: usize,
}

/// Counters plus current breaker, limiter and store state
#[derive(Debug, Serialize, ToSchema)]
pub struct MetricsData {
    pub counters: MetricsSnapshot,
    pub transfers_by_status: Vec<StatusCount>,
    pub circuits: Vec<CircuitSnapshot>,
    pub rate_limiter: RateLimiterUsage,
}

/// Query string of a document access URL
#[derive(Debug, Deserialize)]
pub struct DocumentAccessQuery {
    #[serde(rename = "ref")]
    pub access_ref: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentAccessData {
    pub citizen_id: String,
    pub document_id: String,
}

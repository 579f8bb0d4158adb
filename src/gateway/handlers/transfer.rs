//! Transfer handlers: peer-facing callbacks and local initiation

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, DocumentAccessData, DocumentAccessQuery, MessageData,
    TransferCreatedData, TransferView, created, error_codes, idempotency_key, ok, validate_body,
};
use crate::transfer::{
    CancelTransfer, ConfirmTransfer, IncomingTransfer, InitiateTransfer, TransferId,
    TransferStatus,
};

/// Receive a citizen from a source operator
///
/// POST /transferCitizen
///
/// The record is persisted before responding; document import and the
/// confirmation callback run in the background.
#[utoipa::path(
    post,
    path = "/transferCitizen",
    request_body = IncomingTransfer,
    params(
        ("Idempotency-Key" = String, Header, description = "UUID chosen by the source operator")
    ),
    responses(
        (status = 201, description = "Transfer accepted (or replayed)", body = TransferCreatedData, content_type = "application/json"),
        (status = 400, description = "Missing or malformed Idempotency-Key, invalid body"),
        (status = 409, description = "Idempotency-Key reused with a different payload")
    ),
    tag = "Peer"
)]
pub async fn transfer_citizen(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IncomingTransfer>,
) -> ApiResult<TransferCreatedData> {
    let key = idempotency_key(&headers)?;
    validate_body(&req)?;

    let result = state.saga.accept_incoming(key, &req).await?;
    let record = result.record();

    if !result.is_replay() && record.status == TransferStatus::Pending {
        state.spawn_incoming(record.id).await;
    }

    created(TransferCreatedData::from(&result))
}

/// Destination operator's confirmation callback
///
/// POST /transferCitizenConfirm
///
/// `req_status = 1` deletes the citizen locally and unregisters it from the
/// Hub; `req_status = 0` fails the transfer without deleting anything.
#[utoipa::path(
    post,
    path = "/transferCitizenConfirm",
    request_body = ConfirmTransfer,
    responses(
        (status = 200, description = "Confirmation processed", body = MessageData, content_type = "application/json"),
        (status = 404, description = "No transfer for this citizen and token"),
        (status = 409, description = "Transfer already failed or past the point of no return"),
        (status = 503, description = "Citizen lock busy or local deletion failed; retry later")
    ),
    tag = "Peer"
)]
pub async fn confirm_transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmTransfer>,
) -> ApiResult<MessageData> {
    validate_body(&req)?;
    let message = state.saga.confirm(&req).await?;
    ok(MessageData { message })
}

/// Source operator withdrew a transfer it sent us
///
/// POST /transferCitizenCancel
#[utoipa::path(
    post,
    path = "/transferCitizenCancel",
    request_body = CancelTransfer,
    responses(
        (status = 200, description = "Transfer cancelled", body = MessageData, content_type = "application/json"),
        (status = 404, description = "No incoming transfer for this citizen and token"),
        (status = 409, description = "Transfer already confirmed to the source"),
        (status = 503, description = "Citizen lock busy; retry later")
    ),
    tag = "Peer"
)]
pub async fn cancel_transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelTransfer>,
) -> ApiResult<MessageData> {
    validate_body(&req)?;
    let message = state.saga.cancel_incoming(&req).await?;
    ok(MessageData { message })
}

/// Start moving one of our citizens to another operator
///
/// POST /transfers
#[utoipa::path(
    post,
    path = "/transfers",
    request_body = InitiateTransfer,
    params(
        ("Idempotency-Key" = String, Header, description = "UUID identifying this transfer attempt")
    ),
    responses(
        (status = 201, description = "Transfer sent, waiting for confirmation", body = TransferCreatedData, content_type = "application/json"),
        (status = 400, description = "Missing or malformed Idempotency-Key, invalid body"),
        (status = 404, description = "Citizen not found"),
        (status = 409, description = "Idempotency-Key reused with a different payload"),
        (status = 502, description = "Destination rejected the transfer"),
        (status = 503, description = "Destination unreachable")
    ),
    tag = "Transfer"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InitiateTransfer>,
) -> ApiResult<TransferCreatedData> {
    let key = idempotency_key(&headers)?;
    validate_body(&req)?;

    tracing::info!(citizen_id = %req.citizen_id, destination = %req.destination_operator_id, "Transfer requested");
    let result = state.saga.initiate(key, &req).await?;
    created(TransferCreatedData::from(&result))
}

/// Get transfer status
///
/// GET /transfers/{transfer_id}
#[utoipa::path(
    get,
    path = "/transfers/{transfer_id}",
    params(
        ("transfer_id" = String, Path, description = "Transfer ID (ULID format)")
    ),
    responses(
        (status = 200, description = "Transfer record", body = TransferView, content_type = "application/json"),
        (status = 400, description = "Invalid transfer ID format"),
        (status = 404, description = "Transfer not found")
    ),
    tag = "Transfer"
)]
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<String>,
) -> ApiResult<TransferView> {
    let id: TransferId = transfer_id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid transfer ID format"))?;

    let record = state.saga.get(id).await?;
    ok(TransferView::from(&record))
}

/// Resolve a document access reference handed to a destination
///
/// GET /documents/{document_id}?ref={token}
#[utoipa::path(
    get,
    path = "/documents/{document_id}",
    params(
        ("document_id" = String, Path, description = "Document ID"),
        ("ref" = String, Query, description = "Access reference token")
    ),
    responses(
        (status = 200, description = "Reference is live", body = DocumentAccessData, content_type = "application/json"),
        (status = 404, description = "Unknown, expired or revoked reference")
    ),
    tag = "Peer"
)]
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Query(query): Query<DocumentAccessQuery>,
) -> ApiResult<DocumentAccessData> {
    match state.documents.resolve(&query.access_ref) {
        Some((citizen_id, resolved)) if resolved == document_id => ok(DocumentAccessData {
            citizen_id,
            document_id,
        }),
        _ => Err(ApiError::not_found(
            error_codes::DOCUMENT_NOT_FOUND,
            "Document reference not found or expired",
        )),
    }
}

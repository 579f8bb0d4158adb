//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::handlers::health::HealthResponse;
use crate::gateway::types::{
    DocumentAccessData, MessageData, MetricsData, RateLimiterUsage, StatusCount,
    TransferCreatedData, TransferView,
};
use crate::metrics::MetricsSnapshot;
use crate::resilience::{CircuitSnapshot, CircuitState};
use crate::transfer::{CancelTransfer, ConfirmTransfer, DocumentRef, IncomingTransfer, InitiateTransfer};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Custody Transfer API",
        version = "0.1.0",
        description = "Moves custody of a citizen between operators: idempotent transfer requests, confirmation callbacks, and Hub unregistration with retry and reconciliation.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::transfer::transfer_citizen,
        crate::gateway::handlers::transfer::confirm_transfer,
        crate::gateway::handlers::transfer::cancel_transfer,
        crate::gateway::handlers::transfer::get_document,
        crate::gateway::handlers::transfer::create_transfer,
        crate::gateway::handlers::transfer::get_transfer,
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::health::get_metrics,
    ),
    components(
        schemas(
            IncomingTransfer,
            ConfirmTransfer,
            CancelTransfer,
            InitiateTransfer,
            DocumentRef,
            TransferCreatedData,
            TransferView,
            MessageData,
            DocumentAccessData,
            HealthResponse,
            MetricsData,
            MetricsSnapshot,
            StatusCount,
            RateLimiterUsage,
            CircuitSnapshot,
            CircuitState,
        )
    ),
    tags(
        (name = "Peer", description = "Endpoints called by other operators"),
        (name = "Transfer", description = "Local transfer initiation and status"),
        (name = "System", description = "Health checks and metrics")
    )
)]
pub struct ApiDoc;

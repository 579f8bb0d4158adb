//! Health check and metrics handlers

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{
    ApiResponse, ApiResult, MetricsData, RateLimiterUsage, StatusCount, error_codes, ok,
};
use crate::hub::UNREGISTER_ENDPOINT;

/// Health check response data
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_i64)]
    pub timestamp_ms: i64,
    /// Short git hash of the running build
    #[schema(example = "a1b2c3d")]
    pub git_hash: &'static str,
    /// `postgres` or `memory`
    #[schema(example = "postgres")]
    pub storage: &'static str,
    /// Database round trip, absent for in-memory storage
    #[schema(example = 2)]
    pub db_latency_ms: Option<u64>,
}

/// Health check endpoint
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, git_hash, storage}}
/// - Database unreachable: 503 + {code: 5001, msg: "unavailable"}
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let storage = if state.pg_db.is_some() {
        "postgres"
    } else {
        "memory"
    };

    let mut db_latency_ms = None;
    if let Some(db) = &state.pg_db {
        match db.health_check().await {
            Ok(latency) => db_latency_ms = Some(latency.as_millis() as u64),
            Err(e) => {
                tracing::error!(error = %e, "[HEALTH] PostgreSQL ping failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse {
                        code: error_codes::SERVICE_UNAVAILABLE,
                        msg: "unavailable".to_string(),
                        data: None,
                    }),
                );
            }
        }
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: Utc::now().timestamp_millis(),
            git_hash: env!("GIT_HASH"),
            storage,
            db_latency_ms,
        })),
    )
}

/// Saga counters, transfers by status, circuit breaker and rate limiter state
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Current metrics", body = MetricsData, content_type = "application/json"),
        (status = 500, description = "Transfer store unavailable")
    ),
    tag = "System"
)]
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> ApiResult<MetricsData> {
    let hub = state.saga.hub();
    let transfers_by_status = state
        .saga
        .store()
        .count_by_status()
        .await?
        .into_iter()
        .map(|(status, count)| StatusCount {
            status: status.as_str().to_string(),
            count,
        })
        .collect();

    ok(MetricsData {
        counters: state.saga.metrics().snapshot(),
        transfers_by_status,
        circuits: hub.breaker().snapshot(),
        rate_limiter: RateLimiterUsage {
            endpoint: UNREGISTER_ENDPOINT.to_string(),
            limit_per_minute: hub.limiter().limit(),
            current: hub.limiter().current_count(UNREGISTER_ENDPOINT),
        },
    })
}

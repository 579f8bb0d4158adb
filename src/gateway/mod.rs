pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
use state::AppState;

/// All routes plus Swagger UI
pub fn build_router(state: Arc<AppState>) -> Router {
    // Called by other operators
    let peer_routes = Router::new()
        .route("/transferCitizen", post(handlers::transfer_citizen))
        .route("/transferCitizenConfirm", post(handlers::confirm_transfer))
        .route("/transferCitizenCancel", post(handlers::cancel_transfer))
        .route("/documents/{document_id}", get(handlers::get_document));

    // Local operations
    let transfer_routes = Router::new()
        .route("/transfers", post(handlers::create_transfer))
        .route("/transfers/{transfer_id}", get(handlers::get_transfer));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::get_metrics))
        .merge(peer_routes)
        .merge(transfer_routes)
        .with_state(state)
        // stateless, added after with_state
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Serve until `shutdown` resolves
pub async fn run_server(
    config: &GatewayConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {}: {} (port {} may already be in use)",
            addr,
            e,
            config.port
        )
    })?;

    tracing::info!(%addr, "Gateway listening");
    tracing::info!("API docs: http://{}/docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

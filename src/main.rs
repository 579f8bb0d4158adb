//! Custody Transfer service
//!
//! ```text
//!  peers ──▶ Gateway (axum) ──▶ SagaOrchestrator ──▶ ResilientHub ──▶ Hub
//!                                   │    ▲
//!                                   ▼    │
//!                          TransferStore ◀── ReconciliationSweeper
//! ```
//!
//! Usage: `custody_transfer [--env dev] [--port 8080]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use custody_transfer::config::AppConfig;
use custody_transfer::db::{Database, schema};
use custody_transfer::gateway::{self, state::AppState};
use custody_transfer::hub::{HttpHubClient, ResilientHub};
use custody_transfer::idempotency::{MemoryIdempotencyGuard, PgIdempotencyGuard};
use custody_transfer::lock::{MemoryLockManager, PgLockManager};
use custody_transfer::metrics::SagaMetrics;
use custody_transfer::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
use custody_transfer::transfer::adapters::{
    AlertSink, HttpPeerClient, LocalDocumentService, MemoryCitizenDirectory, PgCitizenDirectory,
    TracingAlertSink, WebhookAlertSink,
};
use custody_transfer::transfer::{
    MemoryTransferStore, PgTransferStore, ReconciliationSweeper, SagaOptions, SagaOrchestrator,
    SagaServices, SweeperSettings,
};

/// How long shutdown waits for background incoming transfers
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

/// Stores backed by PostgreSQL, or in memory when no URL is configured
struct Stores {
    services: SagaServices,
    db: Option<Arc<Database>>,
}

async fn build_stores(
    config: &AppConfig,
    hub: Arc<ResilientHub>,
    documents: Arc<LocalDocumentService>,
    peers: Arc<HttpPeerClient>,
) -> anyhow::Result<Stores> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect_with(url, &config.postgres_pool)
                .await
                .context("Failed to connect to PostgreSQL")?;
            schema::init_schema(db.pool()).await?;
            let pool = db.pool().clone();

            tracing::info!("Using PostgreSQL stores");
            Ok(Stores {
                services: SagaServices {
                    store: Arc::new(PgTransferStore::new(pool.clone())),
                    guard: Arc::new(PgIdempotencyGuard::new(pool.clone())),
                    locks: Arc::new(PgLockManager::new(pool.clone())),
                    hub,
                    documents,
                    citizens: Arc::new(PgCitizenDirectory::new(pool)),
                    peers,
                },
                db: Some(Arc::new(db)),
            })
        }
        None => {
            tracing::warn!("postgres_url not set, using in-memory stores (state is lost on restart)");
            Ok(Stores {
                services: SagaServices {
                    store: Arc::new(MemoryTransferStore::new()),
                    guard: Arc::new(MemoryIdempotencyGuard::new()),
                    locks: Arc::new(MemoryLockManager::new()),
                    hub,
                    documents,
                    citizens: Arc::new(MemoryCitizenDirectory::new()),
                    peers,
                },
                db: None,
            })
        }
    }
}

fn build_alert_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn AlertSink>> {
    match &config.sweeper.alert_webhook_url {
        Some(url) => Ok(Arc::new(WebhookAlertSink::new(
            url,
            config.hub.request_timeout(),
        )?)),
        None => Ok(Arc::new(TracingAlertSink)),
    }
}

async fn run(mut config: AppConfig) -> anyhow::Result<()> {
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }

    let metrics = Arc::new(SagaMetrics::new());

    // Hub: client → rate limiter → circuit breaker
    let hub_client = HttpHubClient::new(
        &config.hub.base_url,
        &config.hub.unregister_path,
        config.hub.request_timeout(),
    )?;
    tracing::info!(url = %hub_client.unregister_url(), "Hub unregister endpoint");
    let hub = Arc::new(ResilientHub::new(
        Arc::new(hub_client),
        Arc::new(RateLimiter::per_minute(config.hub.rate_limit_per_minute)),
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from(
            &config.hub.circuit_breaker,
        ))),
        metrics.clone(),
    ));

    let documents = Arc::new(LocalDocumentService::new(
        &config.operator.public_url,
        Duration::from_secs(config.saga.confirmation_timeout_secs),
    ));
    let peers = Arc::new(HttpPeerClient::new(Duration::from_millis(
        config.saga.peer_timeout_ms,
    ))?);

    let stores = build_stores(&config, hub, documents.clone(), peers).await?;

    let saga = Arc::new(SagaOrchestrator::new(
        stores.services,
        SagaOptions::from_config(&config),
        metrics,
    ));

    let sweeper = Arc::new(ReconciliationSweeper::new(
        saga.clone(),
        build_alert_sink(&config)?,
        SweeperSettings::from_config(&config),
    ));
    let sweeper_handle = sweeper.start();

    let mut state = AppState::new(saga.clone(), documents);
    if let Some(db) = stores.db {
        state = state.with_database(db);
    }

    tracing::info!(
        operator_id = %config.operator.id,
        operator = %config.operator.name,
        "Custody transfer service ready"
    );

    let state = Arc::new(state);
    let result = gateway::run_server(&config.gateway, state.clone(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
    })
    .await;

    state.drain_background(SHUTDOWN_GRACE).await;
    sweeper_handle.stop().await;
    tracing::info!("{}", saga.metrics().snapshot());
    result
}

#[tokio::main]
async fn main() {
    let env = get_env();
    let config = match AppConfig::load(&env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ FATAL: {:#}", e);
            std::process::exit(1);
        }
    };
    let _log_guard = custody_transfer::logging::init_logging(&config);

    tracing::info!(git_hash = env!("GIT_HASH"), "Starting custody transfer service in {} mode", env);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Custody transfer service failed");
        eprintln!("❌ FATAL: {:#}", e);
        std::process::exit(1);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::db::Database;
use crate::transfer::adapters::LocalDocumentService;
use crate::transfer::{SagaOrchestrator, TransferId};

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Saga entry points; also owns the store, Hub gateway and metrics
    pub saga: Arc<SagaOrchestrator>,
    /// Serves the document access references handed to destinations
    pub documents: Arc<LocalDocumentService>,
    /// PostgreSQL pool when running with persistent stores
    pub pg_db: Option<Arc<Database>>,
    /// `complete_incoming` runs started by `/transferCitizen`. Drained on
    /// shutdown; a run that never finished is redone by the sweeper's
    /// stale incoming pass.
    incoming_tasks: Arc<Mutex<JoinSet<()>>>,
}

impl AppState {
    pub fn new(saga: Arc<SagaOrchestrator>, documents: Arc<LocalDocumentService>) -> Self {
        Self {
            saga,
            documents,
            pg_db: None,
            incoming_tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Attach the database so `/health` checks it
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.pg_db = Some(db);
        self
    }

    /// Import an accepted incoming transfer and confirm it to the source,
    /// after the response has gone out
    pub async fn spawn_incoming(&self, id: TransferId) {
        let saga = self.saga.clone();
        let mut tasks = self.incoming_tasks.lock().await;

        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::error!(error = %e, "Incoming transfer task panicked");
            }
        }

        tasks.spawn(async move {
            if let Err(e) = saga.complete_incoming(id).await {
                tracing::warn!(transfer_id = %id, error = %e, "Incoming transfer left for sweeper");
            }
        });
    }

    pub async fn pending_incoming(&self) -> usize {
        self.incoming_tasks.lock().await.len()
    }

    /// Wait up to `timeout` for background incoming transfers; the rest
    /// are aborted
    pub async fn drain_background(&self, timeout: Duration) {
        let mut tasks = std::mem::take(&mut *self.incoming_tasks.lock().await);
        if tasks.is_empty() {
            return;
        }
        tracing::info!(pending = tasks.len(), "Waiting for incoming transfer tasks");

        let drained = tokio::time::timeout(timeout, async {
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "Incoming transfer task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "Aborting unfinished incoming transfers, sweeper will resume them");
            tasks.abort_all();
        }
    }
}

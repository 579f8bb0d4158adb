//! Custody Transfer Saga
//!
//! Outgoing transfer steps:
//!
//! ```text
//! (a) issue document access refs        compensation: discard refs
//! (b) send payload to destination       compensation: best-effort cancel
//! (c) destination confirmation callback (record waits in PENDING)
//! (d) delete local data under `delete:{citizen_id}`   ◄── point of no return
//! (e) Hub unregister via ResilientHub   failure: park in PENDING_UNREGISTER
//! ```
//!
//! Before (d) any failure ends in FAILED with compensation. After (d)
//! nothing is rolled back: the record only moves forward, and the sweeper
//! finishes whatever the request path could not.
//!
//! Every status change is a CAS on the expected status. A CAS that loses
//! re-reads the record and continues from the state the winner left.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::adapters::{CitizenDirectory, CitizenProfile, DocumentService, PeerOperatorClient};
use super::error::TransferError;
use super::state::TransferStatus;
use super::store::TransferStore;
use super::types::{
    CancelTransfer, ConfirmTransfer, Direction, IncomingTransfer, InitiateTransfer,
    OperatorIdentity, TransferId, TransferRecord,
};
use crate::config::AppConfig;
use crate::hub::{ResilientHub, UnregisterCitizen};
use crate::idempotency::{IdempotencyGuard, RegisterOutcome, confirmation_key, creation_key};
use crate::lock::{DistributedLock, LockHandle, acquire_with_backoff, deletion_lock_key};
use crate::metrics::SagaMetrics;
use crate::resilience::{CallOutcome, RetryPolicy, retry_call};

/// Injected collaborators
#[derive(Clone)]
pub struct SagaServices {
    pub store: Arc<dyn TransferStore>,
    pub guard: Arc<dyn IdempotencyGuard>,
    pub locks: Arc<dyn DistributedLock>,
    pub hub: Arc<ResilientHub>,
    pub documents: Arc<dyn DocumentService>,
    pub citizens: Arc<dyn CitizenDirectory>,
    pub peers: Arc<dyn PeerOperatorClient>,
}

#[derive(Debug, Clone)]
pub struct SagaOptions {
    pub operator: OperatorIdentity,
    /// Our confirmation endpoint, sent to destinations
    pub confirm_url: String,
    pub idempotency_ttl: Duration,
    pub confirm_idempotency_ttl: Duration,
    pub lock_ttl: Duration,
    pub lock_acquire_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub peer_retry: RetryPolicy,
    pub hub_retry: RetryPolicy,
}

impl SagaOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let saga = &config.saga;
        Self {
            operator: OperatorIdentity {
                id: config.operator.id.clone(),
                name: config.operator.name.clone(),
            },
            confirm_url: format!(
                "{}/transferCitizenConfirm",
                config.operator.public_url.trim_end_matches('/')
            ),
            idempotency_ttl: Duration::from_secs(saga.idempotency_ttl_secs),
            confirm_idempotency_ttl: Duration::from_secs(saga.confirm_idempotency_ttl_secs),
            lock_ttl: Duration::from_secs(saga.lock_ttl_secs),
            lock_acquire_timeout: Duration::from_millis(saga.lock_acquire_timeout_ms),
            confirmation_timeout: Duration::from_secs(saga.confirmation_timeout_secs),
            peer_retry: RetryPolicy::from(&saga.peer_retry),
            hub_retry: RetryPolicy::from(&config.hub.retry),
        }
    }
}

/// Result of a guarded creation request
#[derive(Debug, Clone, PartialEq)]
pub enum SagaResult {
    /// This request created the record
    Created(TransferRecord),
    /// Same key seen before with the same payload; the existing record
    Replayed(TransferRecord),
}

impl SagaResult {
    pub fn record(&self) -> &TransferRecord {
        match self {
            SagaResult::Created(r) | SagaResult::Replayed(r) => r,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, SagaResult::Replayed(_))
    }
}

/// `Idempotency-Key` must be present and UUID-shaped
pub fn validate_idempotency_key(key: &str) -> Result<(), TransferError> {
    if key.trim().is_empty() {
        return Err(TransferError::MissingIdempotencyKey);
    }
    uuid::Uuid::parse_str(key)
        .map(|_| ())
        .map_err(|_| TransferError::InvalidIdempotencyKey(key.to_string()))
}

pub struct SagaOrchestrator {
    services: SagaServices,
    options: SagaOptions,
    metrics: Arc<SagaMetrics>,
}

impl SagaOrchestrator {
    pub fn new(services: SagaServices, options: SagaOptions, metrics: Arc<SagaMetrics>) -> Self {
        Self {
            services,
            options,
            metrics,
        }
    }

    pub fn options(&self) -> &SagaOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.services.store
    }

    pub fn guard(&self) -> &Arc<dyn IdempotencyGuard> {
        &self.services.guard
    }

    pub fn hub(&self) -> &Arc<ResilientHub> {
        &self.services.hub
    }

    pub fn metrics(&self) -> &Arc<SagaMetrics> {
        &self.metrics
    }

    pub async fn get(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        self.services
            .store
            .get(id)
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))
    }

    // ------------------------------------------------------------------
    // Outgoing: we are the source
    // ------------------------------------------------------------------

    /// Start moving one of our citizens to another operator (steps a, b)
    pub async fn initiate(
        &self,
        idempotency_key: &str,
        req: &InitiateTransfer,
    ) -> Result<SagaResult, TransferError> {
        validate_idempotency_key(idempotency_key)?;
        let guard_key = creation_key(idempotency_key);
        let same_request = |r: &TransferRecord| r.matches_initiate(req);

        if let RegisterOutcome::AlreadyExists(_) = self
            .services
            .guard
            .register(&guard_key, self.options.idempotency_ttl)
            .await?
        {
            return self.replay(idempotency_key, same_request).await;
        }
        // the guard entry expires long before the record; a replay after
        // that must not reach the citizen lookup (gone once transferred)
        if let Some(result) = self
            .replay_from_store(&guard_key, idempotency_key, same_request)
            .await?
        {
            return Ok(result);
        }

        let profile = match self.services.citizens.load_citizen(&req.citizen_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                return self
                    .abandon(&guard_key, TransferError::CitizenNotFound(req.citizen_id.clone()))
                    .await;
            }
            Err(e) => return self.abandon(&guard_key, e).await,
        };

        // persist before any remote call
        let record = TransferRecord::outgoing(
            idempotency_key,
            req,
            &profile.name,
            &profile.email,
            profile.document_ids.clone(),
            &self.options.operator,
        );
        if let Err(e) = self.services.store.create(&record).await {
            return self
                .create_failed(&guard_key, idempotency_key, e, same_request)
                .await;
        }
        self.services
            .guard
            .complete(&guard_key, &record.id.to_string())
            .await?;
        self.metrics.add_created();
        info!(transfer_id = %record.id, citizen_id = %record.citizen_id, destination = %record.destination_operator_id, "Outgoing transfer created");

        // (a) document access refs
        let documents = match self
            .services
            .documents
            .issue_access_refs(record.id, &record.citizen_id, &record.document_refs)
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                let reason = format!("document access refs failed: {}", e);
                self.fail_outgoing(&record, &reason, false).await?;
                return Err(e);
            }
        };

        // (b) hand the citizen over
        let payload = record.to_payload(documents, &self.options.confirm_url);
        let destination_url = record.destination_url.clone().unwrap_or_default();
        let peers = &self.services.peers;
        let report = retry_call(&self.options.peer_retry, |_| {
            peers.send_transfer(&destination_url, idempotency_key, &payload)
        })
        .await;

        let err = match report.outcome {
            CallOutcome::Success(()) => {
                info!(transfer_id = %record.id, attempts = report.attempts, "Transfer delivered to destination, awaiting confirmation");
                return Ok(SagaResult::Created(self.get(record.id).await?));
            }
            CallOutcome::Retryable(e) => TransferError::PeerUnavailable(e),
            CallOutcome::Terminal(e) => TransferError::PeerRejected(e),
        };

        if self.fail_outgoing(&record, &err.to_string(), true).await? {
            return Err(err);
        }
        // the destination confirmed while we were still retrying
        let current = self.get(record.id).await?;
        debug!(transfer_id = %record.id, status = %current.status, "Delivery failure lost race with confirmation");
        Ok(SagaResult::Created(current))
    }

    /// Destination callback (steps c to e). Returns a human-readable message.
    pub async fn confirm(&self, req: &ConfirmTransfer) -> Result<String, TransferError> {
        let guard_key = confirmation_key(&req.token);

        match self
            .services
            .guard
            .register(&guard_key, self.options.confirm_idempotency_ttl)
            .await?
        {
            RegisterOutcome::Accepted => {}
            RegisterOutcome::AlreadyExists(Some(message)) => {
                self.metrics.add_replayed();
                debug!(token = %req.token, "Confirmation replayed from cache");
                return Ok(message);
            }
            RegisterOutcome::AlreadyExists(None) => {
                return Err(TransferError::LockContention(req.citizen_id.clone()));
            }
        }

        match self.confirm_guarded(req).await {
            Ok(message) => {
                // the work is done; a lost cache entry only costs a re-evaluation
                if let Err(e) = self.services.guard.complete(&guard_key, &message).await {
                    warn!(token = %req.token, error = %e, "Failed to cache confirmation result");
                }
                Ok(message)
            }
            // nothing to cache: the next attempt re-evaluates the record
            Err(e) => self.abandon(&guard_key, e).await,
        }
    }

    async fn confirm_guarded(&self, req: &ConfirmTransfer) -> Result<String, TransferError> {
        let record = self
            .services
            .store
            .find_outgoing(&req.citizen_id, &req.token)
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(req.token.clone()))?;

        if record.status == TransferStatus::Failed {
            return Err(TransferError::TransferAlreadyFailed(record.id.to_string()));
        }
        if req.req_status == 0 && record.status != TransferStatus::Pending {
            return Err(TransferError::PastPointOfNoReturn(record.id.to_string()));
        }
        if record.status.is_past_deletion() {
            return Ok(completion_message(&record));
        }

        let lock = self.lock_blocking(&record.citizen_id).await?;
        let result = self.confirm_locked(&lock, record.id, req.req_status).await;
        self.release(&lock).await;
        result
    }

    async fn confirm_locked(
        &self,
        lock: &LockHandle,
        id: TransferId,
        req_status: u8,
    ) -> Result<String, TransferError> {
        let record = self.get(id).await?;

        if req_status == 0 {
            return match record.status {
                TransferStatus::Pending => {
                    if self
                        .fail_outgoing(&record, "rejected by destination", true)
                        .await?
                    {
                        Ok(format!(
                            "Transfer of citizen {} rejected by destination; local data kept",
                            record.citizen_id
                        ))
                    } else {
                        // lost the CAS to a timeout or another rejection
                        Err(TransferError::TransferAlreadyFailed(id.to_string()))
                    }
                }
                TransferStatus::Failed => Err(TransferError::TransferAlreadyFailed(id.to_string())),
                _ => Err(TransferError::PastPointOfNoReturn(id.to_string())),
            };
        }

        if record.status == TransferStatus::Pending
            && self
                .services
                .store
                .update_status_if(id, TransferStatus::Pending, TransferStatus::Confirmed)
                .await?
        {
            self.metrics.add_transition(TransferStatus::Confirmed);
            info!(transfer_id = %id, citizen_id = %record.citizen_id, "Destination confirmed receipt");
        }

        let record = self.get(id).await?;
        let record = match record.status {
            TransferStatus::Confirmed => self.finish_confirmed(lock, record).await?,
            TransferStatus::Failed => {
                return Err(TransferError::TransferAlreadyFailed(id.to_string()));
            }
            _ => record,
        };
        Ok(completion_message(&record))
    }

    /// Steps (d) and (e) for a CONFIRMED record. Caller holds `lock`.
    async fn finish_confirmed(
        &self,
        lock: &LockHandle,
        record: TransferRecord,
    ) -> Result<TransferRecord, TransferError> {
        let id = record.id;

        // (d) point of no return
        match self.services.citizens.delete_citizen(&record.citizen_id).await {
            Ok(deleted) => {
                info!(transfer_id = %id, citizen_id = %record.citizen_id, deleted, "Local citizen data deleted")
            }
            Err(e) => {
                let reason = format!("local deletion failed: {}", e);
                error!(transfer_id = %id, citizen_id = %record.citizen_id, error = %e, "Local deletion failed, transfer stays CONFIRMED");
                self.services.store.record_error(id, &reason).await?;
                return Err(TransferError::DeletionFailed(e.to_string()));
            }
        }

        // Past deletion nothing is reported as an error: the sweeper's
        // stale CONFIRMED and PENDING_UNREGISTER passes pick up from here.
        match self.advance_after_deletion(lock, &record).await {
            Ok(record) => Ok(record),
            Err(e) => {
                error!(transfer_id = %id, citizen_id = %record.citizen_id, error = %e, "Step after local deletion failed, left for sweeper");
                if let Err(e) = self.services.store.record_error(id, &e.to_string()).await {
                    warn!(transfer_id = %id, error = %e, "Failed to record post-deletion error");
                }
                Ok(self.get(id).await.unwrap_or(record))
            }
        }
    }

    /// CONFIRMED → PENDING_UNREGISTER, then step (e)
    async fn advance_after_deletion(
        &self,
        lock: &LockHandle,
        record: &TransferRecord,
    ) -> Result<TransferRecord, TransferError> {
        let id = record.id;
        if !self
            .services
            .store
            .update_status_if(id, TransferStatus::Confirmed, TransferStatus::PendingUnregister)
            .await?
        {
            return self.get(id).await;
        }
        self.metrics.add_transition(TransferStatus::PendingUnregister);

        if let Err(e) = self.services.documents.discard_access_refs(id).await {
            warn!(transfer_id = %id, error = %e, "Failed to discard access refs after deletion");
        }

        // (e)
        let record = self.get(id).await?;
        self.unregister(lock, record, &self.options.hub_retry).await
    }

    /// Hub unregister for a PENDING_UNREGISTER record. Caller holds `lock`.
    async fn unregister(
        &self,
        lock: &LockHandle,
        record: TransferRecord,
        policy: &RetryPolicy,
    ) -> Result<TransferRecord, TransferError> {
        let id = record.id;

        // retries with backoff must not outlive the lease
        if !self
            .services
            .locks
            .extend(&lock.resource_key, &lock.owner_token, self.options.lock_ttl)
            .await?
        {
            warn!(transfer_id = %id, resource_key = %lock.resource_key, "Lock lease lost before Hub call, leaving for sweeper");
            return Ok(record);
        }

        let req = UnregisterCitizen {
            id: record.citizen_id.clone(),
            operator_id: self.options.operator.id.clone(),
            operator_name: self.options.operator.name.clone(),
        };
        let report = self.services.hub.unregister_citizen(&req, policy).await;
        let failed = report.failed_attempts() as i32;

        if failed > 0 {
            let retry_count = self
                .services
                .store
                .increment_retry(id, failed, &report.outcome.describe())
                .await?;
            debug!(transfer_id = %id, retry_count, "Hub failures recorded");
        }

        if report.outcome.is_success() {
            if self
                .services
                .store
                .update_status_if(id, TransferStatus::PendingUnregister, TransferStatus::Success)
                .await?
            {
                self.metrics.add_transition(TransferStatus::Success);
                info!(transfer_id = %id, citizen_id = %record.citizen_id, attempts = report.attempts, "Citizen unregistered from Hub, transfer complete");
            }
        } else {
            if failed == 0 {
                self.services
                    .store
                    .record_error(id, &report.outcome.describe())
                    .await?;
            }
            warn!(transfer_id = %id, citizen_id = %record.citizen_id, outcome = %report.outcome.describe(), "Hub unregister deferred to sweeper");
        }

        self.get(id).await
    }

    /// Finish a record left CONFIRMED (crash or failed deletion).
    /// `None` when another worker holds the citizen's lock.
    pub async fn resume_confirmed(
        &self,
        record: &TransferRecord,
    ) -> Result<Option<TransferRecord>, TransferError> {
        let Some(lock) = self.try_lock(&record.citizen_id).await? else {
            return Ok(None);
        };

        let result = match self.get(record.id).await {
            Ok(current) if current.status == TransferStatus::Confirmed => {
                info!(transfer_id = %record.id, "Resuming confirmed transfer");
                self.finish_confirmed(&lock, current).await
            }
            other => other,
        };
        self.release(&lock).await;
        result.map(Some)
    }

    /// One single-attempt Hub retry for a PENDING_UNREGISTER record.
    /// `None` when another worker holds the citizen's lock.
    pub async fn retry_unregister(
        &self,
        record: &TransferRecord,
    ) -> Result<Option<TransferRecord>, TransferError> {
        let Some(lock) = self.try_lock(&record.citizen_id).await? else {
            return Ok(None);
        };

        let result = match self.get(record.id).await {
            Ok(current) if current.status == TransferStatus::PendingUnregister => {
                self.unregister(&lock, current, &RetryPolicy::single_attempt())
                    .await
            }
            other => other,
        };
        self.release(&lock).await;
        result.map(Some)
    }

    /// Confirmation timeout: PENDING outgoing record → FAILED with compensation
    pub async fn expire_pending(&self, record: &TransferRecord) -> Result<bool, TransferError> {
        if record.direction != Direction::Outgoing || record.status != TransferStatus::Pending {
            return Ok(false);
        }
        self.fail_outgoing(record, "confirmation timeout", true)
            .await
    }

    /// CAS PENDING → FAILED, then compensate. `false` if the CAS lost.
    async fn fail_outgoing(
        &self,
        record: &TransferRecord,
        reason: &str,
        notify_destination: bool,
    ) -> Result<bool, TransferError> {
        if !self
            .services
            .store
            .update_status_with_error(
                record.id,
                TransferStatus::Pending,
                TransferStatus::Failed,
                reason,
            )
            .await?
        {
            return Ok(false);
        }
        self.metrics.add_transition(TransferStatus::Failed);
        warn!(transfer_id = %record.id, citizen_id = %record.citizen_id, reason, "Outgoing transfer failed");

        if let Err(e) = self.services.documents.discard_access_refs(record.id).await {
            warn!(transfer_id = %record.id, error = %e, "Failed to discard access refs");
        }

        let base_url = record
            .destination_url
            .as_deref()
            .filter(|_| notify_destination);
        if let Some(base_url) = base_url {
            let cancel = CancelTransfer {
                citizen_id: record.citizen_id.clone(),
                token: record.idempotency_key.clone(),
                reason: reason.to_string(),
            };
            if let CallOutcome::Retryable(e) | CallOutcome::Terminal(e) =
                self.services.peers.send_cancel(base_url, &cancel).await
            {
                debug!(transfer_id = %record.id, error = %e, "Cancel notice not delivered");
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Incoming: we are the destination
    // ------------------------------------------------------------------

    /// Persist a citizen pushed to us. The import and confirmation run
    /// afterwards in [`Self::complete_incoming`].
    pub async fn accept_incoming(
        &self,
        idempotency_key: &str,
        req: &IncomingTransfer,
    ) -> Result<SagaResult, TransferError> {
        validate_idempotency_key(idempotency_key)?;
        let guard_key = creation_key(idempotency_key);
        let same_request = |r: &TransferRecord| r.matches_incoming(req);

        if let RegisterOutcome::AlreadyExists(_) = self
            .services
            .guard
            .register(&guard_key, self.options.idempotency_ttl)
            .await?
        {
            return self.replay(idempotency_key, same_request).await;
        }
        if let Some(result) = self
            .replay_from_store(&guard_key, idempotency_key, same_request)
            .await?
        {
            return Ok(result);
        }

        let record = TransferRecord::incoming(idempotency_key, req);
        if let Err(e) = self.services.store.create(&record).await {
            return self
                .create_failed(&guard_key, idempotency_key, e, same_request)
                .await;
        }
        self.services
            .guard
            .complete(&guard_key, &record.id.to_string())
            .await?;
        self.metrics.add_created();
        info!(transfer_id = %record.id, citizen_id = %record.citizen_id, source = %record.source_operator_id, documents = record.document_refs.len(), "Incoming transfer accepted");

        Ok(SagaResult::Created(record))
    }

    /// Import the citizen and tell the source. PENDING → CONFIRMED on
    /// success, FAILED when the import fails or the source refuses.
    pub async fn complete_incoming(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        let record = self.get(id).await?;
        if record.direction != Direction::Incoming {
            return Err(TransferError::InvalidRequest(format!(
                "{} is not an incoming transfer",
                id
            )));
        }
        if record.status != TransferStatus::Pending {
            return Ok(record);
        }

        let Some(lock) = self.try_lock(&record.citizen_id).await? else {
            return Err(TransferError::LockContention(record.citizen_id.clone()));
        };
        let result = self.complete_incoming_locked(id).await;
        self.release(&lock).await;
        result
    }

    async fn complete_incoming_locked(
        &self,
        id: TransferId,
    ) -> Result<TransferRecord, TransferError> {
        let record = self.get(id).await?;
        if record.status != TransferStatus::Pending {
            return Ok(record);
        }
        let confirm_url = record.confirm_url.clone().ok_or_else(|| {
            TransferError::SystemError(format!("Incoming transfer {} has no confirm_url", id))
        })?;

        let documents = record.incoming_documents();
        let profile = CitizenProfile {
            citizen_id: record.citizen_id.clone(),
            name: record.citizen_name.clone(),
            email: record.citizen_email.clone(),
            document_ids: record.document_refs.clone(),
        };
        let imported = match self
            .services
            .documents
            .import_documents(&record.citizen_id, &documents)
            .await
        {
            Ok(()) => self.services.citizens.import_citizen(&profile, &documents).await,
            Err(e) => Err(e),
        };

        let confirm = ConfirmTransfer {
            citizen_id: record.citizen_id.clone(),
            req_status: u8::from(imported.is_ok()),
            token: record.idempotency_key.clone(),
        };
        let peers = &self.services.peers;
        let report = retry_call(&self.options.peer_retry, |_| {
            peers.send_confirmation(&confirm_url, &confirm)
        })
        .await;

        let (next, reason) = match (&imported, report.outcome) {
            (Ok(()), CallOutcome::Success(())) => (TransferStatus::Confirmed, None),
            (Ok(()), CallOutcome::Retryable(e)) => {
                // imported, source not told yet: stays PENDING for the sweeper
                let reason = format!("confirmation not delivered: {}", e);
                warn!(transfer_id = %id, attempts = report.attempts, error = %e, "Confirmation delivery failed");
                self.services.store.record_error(id, &reason).await?;
                return Err(TransferError::PeerUnavailable(e));
            }
            (Ok(()), CallOutcome::Terminal(e)) => {
                // source refused: it still holds the citizen, drop our copy
                if let Err(del) = self.services.citizens.delete_citizen(&record.citizen_id).await {
                    error!(transfer_id = %id, error = %del, "Failed to remove refused import");
                }
                (
                    TransferStatus::Failed,
                    Some(format!("source refused confirmation: {}", e)),
                )
            }
            (Err(e), _) => (TransferStatus::Failed, Some(format!("import failed: {}", e))),
        };

        let moved = match &reason {
            None => {
                self.services
                    .store
                    .update_status_if(id, TransferStatus::Pending, next)
                    .await?
            }
            Some(reason) => {
                self.services
                    .store
                    .update_status_with_error(id, TransferStatus::Pending, next, reason)
                    .await?
            }
        };
        if moved {
            self.metrics.add_transition(next);
            info!(transfer_id = %id, citizen_id = %record.citizen_id, status = %next, "Incoming transfer settled");
        }
        self.get(id).await
    }

    /// Source gave up on a transfer it sent us
    pub async fn cancel_incoming(&self, req: &CancelTransfer) -> Result<String, TransferError> {
        let record = self
            .services
            .store
            .get_by_idempotency_key(&req.token)
            .await?
            .filter(|r| r.direction == Direction::Incoming && r.citizen_id == req.citizen_id)
            .ok_or_else(|| TransferError::TransferNotFound(req.token.clone()))?;

        match record.status {
            TransferStatus::Failed => return Ok(cancel_message(&record)),
            TransferStatus::Pending => {}
            _ => return Err(TransferError::PastPointOfNoReturn(record.id.to_string())),
        }

        let lock = self.lock_blocking(&record.citizen_id).await?;
        let result = self.cancel_incoming_locked(record.id, &req.reason).await;
        self.release(&lock).await;
        result
    }

    async fn cancel_incoming_locked(
        &self,
        id: TransferId,
        reason: &str,
    ) -> Result<String, TransferError> {
        let record = self.get(id).await?;
        match record.status {
            TransferStatus::Pending => {
                // an import may already have landed
                self.services.citizens.delete_citizen(&record.citizen_id).await?;
                let reason = format!("cancelled by source: {}", reason);
                if self
                    .services
                    .store
                    .update_status_with_error(id, TransferStatus::Pending, TransferStatus::Failed, &reason)
                    .await?
                {
                    self.metrics.add_transition(TransferStatus::Failed);
                    info!(transfer_id = %id, citizen_id = %record.citizen_id, "Incoming transfer cancelled by source");
                }
                Ok(cancel_message(&record))
            }
            TransferStatus::Failed => Ok(cancel_message(&record)),
            _ => Err(TransferError::PastPointOfNoReturn(id.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    async fn replay(
        &self,
        idempotency_key: &str,
        same_request: impl Fn(&TransferRecord) -> bool,
    ) -> Result<SagaResult, TransferError> {
        match self
            .services
            .store
            .get_by_idempotency_key(idempotency_key)
            .await?
        {
            Some(record) => self.replay_record(idempotency_key, record, same_request),
            None => Err(TransferError::RequestInProgress),
        }
    }

    fn replay_record(
        &self,
        idempotency_key: &str,
        record: TransferRecord,
        same_request: impl Fn(&TransferRecord) -> bool,
    ) -> Result<SagaResult, TransferError> {
        if same_request(&record) {
            self.metrics.add_replayed();
            debug!(transfer_id = %record.id, "Idempotent replay");
            Ok(SagaResult::Replayed(record))
        } else {
            warn!(transfer_id = %record.id, "Idempotency key reused with a different payload");
            Err(TransferError::IdempotencyConflict(idempotency_key.to_string()))
        }
    }

    /// Replay from the record store after the guard accepted a key it had
    /// forgotten. `None` when no record exists for the key.
    async fn replay_from_store(
        &self,
        guard_key: &str,
        idempotency_key: &str,
        same_request: impl Fn(&TransferRecord) -> bool,
    ) -> Result<Option<SagaResult>, TransferError> {
        let existing = match self
            .services
            .store
            .get_by_idempotency_key(idempotency_key)
            .await
        {
            Ok(existing) => existing,
            Err(e) => return self.abandon(guard_key, e).await,
        };
        let Some(record) = existing else {
            return Ok(None);
        };

        debug!(transfer_id = %record.id, "Idempotency key expired from guard, answering from record");
        if let Err(e) = self
            .services
            .guard
            .complete(guard_key, &record.id.to_string())
            .await
        {
            warn!(guard_key, error = %e, "Failed to re-cache idempotency key");
        }
        self.replay_record(idempotency_key, record, same_request)
            .map(Some)
    }

    /// `create` lost to a record under the same key: answer as a replay
    async fn create_failed(
        &self,
        guard_key: &str,
        idempotency_key: &str,
        err: TransferError,
        same_request: impl Fn(&TransferRecord) -> bool,
    ) -> Result<SagaResult, TransferError> {
        if matches!(err, TransferError::IdempotencyConflict(_)) {
            if let Some(result) = self
                .replay_from_store(guard_key, idempotency_key, same_request)
                .await?
            {
                return Ok(result);
            }
        }
        self.abandon(guard_key, err).await
    }

    /// Drop the guard entry of an operation that produced no side effect
    async fn abandon<T>(&self, guard_key: &str, err: TransferError) -> Result<T, TransferError> {
        if let Err(e) = self.services.guard.forget(guard_key).await {
            warn!(guard_key, error = %e, "Failed to release idempotency key");
        }
        Err(err)
    }

    async fn lock_blocking(&self, citizen_id: &str) -> Result<LockHandle, TransferError> {
        let acquired = acquire_with_backoff(
            self.services.locks.as_ref(),
            &deletion_lock_key(citizen_id),
            self.options.lock_ttl,
            self.options.lock_acquire_timeout,
        )
        .await?;

        acquired.ok_or_else(|| {
            self.metrics.add_lock_contention();
            warn!(citizen_id, "Citizen lock contended");
            TransferError::LockContention(citizen_id.to_string())
        })
    }

    async fn try_lock(&self, citizen_id: &str) -> Result<Option<LockHandle>, TransferError> {
        let acquired = self
            .services
            .locks
            .acquire(&deletion_lock_key(citizen_id), self.options.lock_ttl)
            .await?;
        if acquired.is_none() {
            self.metrics.add_lock_contention();
            debug!(citizen_id, "Citizen lock busy, skipping");
        }
        Ok(acquired)
    }

    async fn release(&self, lock: &LockHandle) {
        match self
            .services
            .locks
            .release(&lock.resource_key, &lock.owner_token)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(resource_key = %lock.resource_key, "Lock expired before release"),
            Err(e) => error!(resource_key = %lock.resource_key, error = %e, "Lock release failed"),
        }
    }
}

fn completion_message(record: &TransferRecord) -> String {
    match record.status {
        TransferStatus::Success => format!(
            "Citizen {} transferred: local data deleted and unregistered from Hub",
            record.citizen_id
        ),
        // CONFIRMED here only after deletion whose bookkeeping failed
        TransferStatus::PendingUnregister | TransferStatus::Confirmed => format!(
            "Citizen {} transferred: local data deleted, Hub unregister pending",
            record.citizen_id
        ),
        status => format!("Transfer of citizen {} is {}", record.citizen_id, status),
    }
}

fn cancel_message(record: &TransferRecord) -> String {
    format!("Transfer of citizen {} cancelled", record.citizen_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::CoordinationError;
    use crate::hub::mock::ScriptedHub;
    use crate::idempotency::MemoryIdempotencyGuard;
    use crate::lock::MemoryLockManager;
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
    use crate::transfer::adapters::mock::{
        MockCitizenDirectory, MockDocumentService, MockPeerClient,
    };
    use crate::transfer::store::MemoryTransferStore;
    use crate::transfer::types::DocumentRef;

    const K1: &str = "6f1f7c3e-8d2a-4c55-9a43-0d6d2f1b7a11";

    struct Harness {
        saga: SagaOrchestrator,
        hub: Arc<ScriptedHub>,
        citizens: Arc<MockCitizenDirectory>,
        documents: Arc<MockDocumentService>,
        peers: Arc<MockPeerClient>,
        locks: Arc<MemoryLockManager>,
        metrics: Arc<SagaMetrics>,
    }

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn harness() -> Harness {
        harness_with(|locks| -> Arc<dyn DistributedLock> { locks })
    }

    /// `lock_layer` wraps the in-memory lock manager the saga sees
    fn harness_with(
        lock_layer: impl FnOnce(Arc<MemoryLockManager>) -> Arc<dyn DistributedLock>,
    ) -> Harness {
        let metrics = Arc::new(SagaMetrics::new());
        let hub = Arc::new(ScriptedHub::new(204));
        let citizens = Arc::new(MockCitizenDirectory::new().with_citizen("C1"));
        let documents = Arc::new(MockDocumentService::new());
        let peers = Arc::new(MockPeerClient::new());
        let locks = Arc::new(MemoryLockManager::new());
        let resilient = Arc::new(ResilientHub::new(
            hub.clone(),
            Arc::new(RateLimiter::per_minute(10)),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 2,
                open_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            })),
            metrics.clone(),
        ));
        let services = SagaServices {
            store: Arc::new(MemoryTransferStore::new()),
            guard: Arc::new(MemoryIdempotencyGuard::new()),
            locks: lock_layer(locks.clone()),
            hub: resilient,
            documents: documents.clone(),
            citizens: citizens.clone(),
            peers: peers.clone(),
        };
        let options = SagaOptions {
            operator: OperatorIdentity {
                id: "op-a".into(),
                name: "Operator A".into(),
            },
            confirm_url: "https://op-a.example/transferCitizenConfirm".into(),
            idempotency_ttl: Duration::from_secs(900),
            confirm_idempotency_ttl: Duration::from_secs(3600),
            lock_ttl: Duration::from_secs(120),
            lock_acquire_timeout: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(1800),
            peer_retry: no_jitter(3),
            hub_retry: no_jitter(3),
        };
        Harness {
            saga: SagaOrchestrator::new(services, options, metrics.clone()),
            hub,
            citizens,
            documents,
            peers,
            locks,
            metrics,
        }
    }

    fn initiate_request() -> InitiateTransfer {
        InitiateTransfer {
            citizen_id: "C1".into(),
            destination_operator_id: "op-b".into(),
            destination_operator_name: "Operator B".into(),
            destination_url: "https://op-b.example".into(),
        }
    }

    fn incoming_request() -> IncomingTransfer {
        IncomingTransfer {
            citizen_id: "C9".into(),
            citizen_name: "Grace Hopper".into(),
            citizen_email: "grace@example.com".into(),
            source_operator_id: "op-z".into(),
            source_operator_name: "Operator Z".into(),
            destination_operator_id: "op-a".into(),
            destination_operator_name: "Operator A".into(),
            documents: vec![DocumentRef {
                document_id: "doc-9".into(),
                url: "https://op-z.example/documents/doc-9?ref=abc".into(),
                expires_at: None,
            }],
            confirm_url: "https://op-z.example/transferCitizenConfirm".into(),
        }
    }

    fn confirm(req_status: u8) -> ConfirmTransfer {
        ConfirmTransfer {
            citizen_id: "C1".into(),
            req_status,
            token: K1.into(),
        }
    }

    /// Lock manager whose lease extension always fails
    struct ExtendFailingLocks(Arc<MemoryLockManager>);

    #[async_trait::async_trait]
    impl DistributedLock for ExtendFailingLocks {
        async fn acquire(
            &self,
            resource_key: &str,
            ttl: Duration,
        ) -> Result<Option<LockHandle>, CoordinationError> {
            self.0.acquire(resource_key, ttl).await
        }

        async fn release(
            &self,
            resource_key: &str,
            owner_token: &str,
        ) -> Result<bool, CoordinationError> {
            self.0.release(resource_key, owner_token).await
        }

        async fn extend(
            &self,
            _resource_key: &str,
            _owner_token: &str,
            _additional_ttl: Duration,
        ) -> Result<bool, CoordinationError> {
            Err(CoordinationError::Unavailable("connection reset".into()))
        }
    }

    #[test]
    fn test_validate_idempotency_key() {
        assert!(validate_idempotency_key(K1).is_ok());
        assert!(matches!(
            validate_idempotency_key(""),
            Err(TransferError::MissingIdempotencyKey)
        ));
        assert!(matches!(
            validate_idempotency_key("K1"),
            Err(TransferError::InvalidIdempotencyKey(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiate_sends_payload_and_stays_pending() {
        let h = harness();
        let result = h.saga.initiate(K1, &initiate_request()).await.unwrap();
        assert!(!result.is_replay());
        assert_eq!(result.record().status, TransferStatus::Pending);

        let sent = h.peers.transfers();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://op-b.example");
        assert_eq!(sent[0].1, K1);
        assert_eq!(sent[0].2.documents.len(), 2);
        assert_eq!(sent[0].2.confirm_url, "https://op-a.example/transferCitizenConfirm");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiate_unknown_citizen_releases_key() {
        let h = harness();
        let mut req = initiate_request();
        req.citizen_id = "C404".into();
        let err = h.saga.initiate(K1, &req).await.unwrap_err();
        assert!(matches!(err, TransferError::CitizenNotFound(_)));

        // key was forgotten, so a corrected request with the same key proceeds
        assert!(h.saga.initiate(K1, &initiate_request()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiate_rejected_by_destination_compensates() {
        let h = harness();
        h.peers.push_transfer_statuses(&[422]);

        let err = h.saga.initiate(K1, &initiate_request()).await.unwrap_err();
        assert!(matches!(err, TransferError::PeerRejected(_)));

        let record = h.saga.store().get_by_idempotency_key(K1).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(h.documents.discard_count(), 1);
        assert_eq!(h.peers.cancels().len(), 1);
        assert!(h.citizens.contains("C1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiate_retries_unavailable_destination() {
        let h = harness();
        h.peers.push_transfer_statuses(&[503, 502]);
        let result = h.saga.initiate(K1, &initiate_request()).await.unwrap();
        assert_eq!(result.record().status, TransferStatus::Pending);
        assert_eq!(h.peers.transfers().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_deletes_and_unregisters() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();

        let message = h.saga.confirm(&confirm(1)).await.unwrap();
        assert!(message.contains("unregistered from Hub"));

        let record = h.saga.store().get_by_idempotency_key(K1).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::Success);
        assert!(record.confirmed_at.is_some());
        assert!(record.unregistered_at.is_some());
        assert!(record.completed_at.is_some());
        assert_eq!(record.retry_count, 0);
        assert!(!h.citizens.contains("C1"));

        let hub_requests = h.hub.requests();
        assert_eq!(hub_requests.len(), 1);
        assert_eq!(hub_requests[0].id, "C1");
        assert_eq!(hub_requests[0].operator_id, "op-a");
        // lock released on the success path
        assert!(h.locks.holder("delete:C1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_replay_deletes_once() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();

        let first = h.saga.confirm(&confirm(1)).await.unwrap();
        let second = h.saga.confirm(&confirm(1)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.citizens.delete_count(), 1);
        assert_eq!(h.hub.calls(), 1);
        assert_eq!(h.metrics.snapshot().transfers_replayed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_keeps_citizen() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();

        h.saga.confirm(&confirm(0)).await.unwrap();
        let record = h.saga.store().get_by_idempotency_key(K1).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert!(h.citizens.contains("C1"));
        assert_eq!(h.hub.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_unknown_token_is_not_found() {
        let h = harness();
        let err = h.saga.confirm(&confirm(1)).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_confirm_after_rejection_replays_rejection() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();
        let rejected = h.saga.confirm(&confirm(0)).await.unwrap();

        // same token: the cached rejection answers, nothing is deleted
        let replayed = h.saga.confirm(&confirm(1)).await.unwrap();
        assert_eq!(replayed, rejected);
        let record = h.saga.store().get_by_idempotency_key(K1).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert!(h.citizens.contains("C1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_contention_is_503_and_retriable() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();
        let held = h
            .locks
            .acquire("delete:C1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let err = h.saga.confirm(&confirm(1)).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert!(h.citizens.contains("C1"));
        assert_eq!(h.metrics.snapshot().lock_contentions, 1);

        h.locks.release("delete:C1", &held.owner_token).await.unwrap();
        // the guard key was forgotten, so the retry runs for real
        h.saga.confirm(&confirm(1)).await.unwrap();
        assert!(!h.citizens.contains("C1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_failure_stays_confirmed() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();
        h.citizens.set_fail_delete(true);

        let err = h.saga.confirm(&confirm(1)).await.unwrap_err();
        assert!(matches!(err, TransferError::DeletionFailed(_)));
        let record = h.saga.store().get_by_idempotency_key(K1).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::Confirmed);
        assert!(record.error_message.is_some());
        assert_eq!(h.hub.calls(), 0);

        h.citizens.set_fail_delete(false);
        let resumed = h.saga.resume_confirmed(&record).await.unwrap().unwrap();
        assert_eq!(resumed.status, TransferStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_terminal_parks_record() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();
        h.hub.push_statuses(&[400]);

        let message = h.saga.confirm(&confirm(1)).await.unwrap();
        assert!(message.contains("Hub unregister pending"));
        let record = h.saga.store().get_by_idempotency_key(K1).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::PendingUnregister);
        assert_eq!(record.retry_count, 1);
        assert_eq!(h.hub.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_pending_compensates() {
        let h = harness();
        let result = h.saga.initiate(K1, &initiate_request()).await.unwrap();

        assert!(h.saga.expire_pending(result.record()).await.unwrap());
        let record = h.saga.get(result.record().id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("confirmation timeout"));
        assert_eq!(h.peers.cancels()[0].token, K1);

        // no second compensation
        assert!(!h.saga.expire_pending(&record).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_incoming_replay_and_conflict() {
        let h = harness();
        let req = incoming_request();
        let created = h.saga.accept_incoming(K1, &req).await.unwrap();
        let replayed = h.saga.accept_incoming(K1, &req).await.unwrap();
        assert!(replayed.is_replay());
        assert_eq!(created.record().id, replayed.record().id);

        let mut different = req.clone();
        different.citizen_email = "other@example.com".into();
        let err = h.saga.accept_incoming(K1, &different).await.unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_incoming_imports_and_confirms() {
        let h = harness();
        let created = h.saga.accept_incoming(K1, &incoming_request()).await.unwrap();

        let record = h.saga.complete_incoming(created.record().id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Confirmed);
        assert!(h.citizens.contains("C9"));

        let confirmations = h.peers.confirmations();
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].0, "https://op-z.example/transferCitizenConfirm");
        assert_eq!(confirmations[0].1.req_status, 1);
        assert_eq!(confirmations[0].1.token, K1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_incoming_import_failure_reports_rejection() {
        let h = harness();
        h.citizens.set_fail_import(true);
        let created = h.saga.accept_incoming(K1, &incoming_request()).await.unwrap();

        let record = h.saga.complete_incoming(created.record().id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(h.peers.confirmations()[0].1.req_status, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_incoming_undelivered_stays_pending() {
        let h = harness();
        h.peers.set_confirm_status(503);
        let created = h.saga.accept_incoming(K1, &incoming_request()).await.unwrap();

        let err = h.saga.complete_incoming(created.record().id).await.unwrap_err();
        assert!(matches!(err, TransferError::PeerUnavailable(_)));
        let record = h.saga.get(created.record().id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Pending);
        assert_eq!(h.peers.confirmations().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_incoming() {
        let h = harness();
        let created = h.saga.accept_incoming(K1, &incoming_request()).await.unwrap();
        let cancel = CancelTransfer {
            citizen_id: "C9".into(),
            token: K1.into(),
            reason: "confirmation timeout".into(),
        };

        h.saga.cancel_incoming(&cancel).await.unwrap();
        let record = h.saga.get(created.record().id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        // idempotent
        assert!(h.saga.cancel_incoming(&cancel).await.is_ok());
        // nothing left to complete
        let record = h.saga.complete_incoming(record.id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert!(h.peers.confirmations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_confirmed_is_refused() {
        let h = harness();
        let created = h.saga.accept_incoming(K1, &incoming_request()).await.unwrap();
        h.saga.complete_incoming(created.record().id).await.unwrap();

        let err = h
            .saga
            .cancel_incoming(&CancelTransfer {
                citizen_id: "C9".into(),
                token: K1.into(),
                reason: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::PastPointOfNoReturn(_)));
        assert!(h.citizens.contains("C9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_incoming_replay_after_guard_expiry() {
        let h = harness();
        let req = incoming_request();
        let created = h.saga.accept_incoming(K1, &req).await.unwrap();

        // guard TTL is 15 minutes, the record lives on
        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        let replayed = h.saga.accept_incoming(K1, &req).await.unwrap();
        assert!(replayed.is_replay());
        assert_eq!(replayed.record().id, created.record().id);

        let mut different = req.clone();
        different.citizen_email = "other@example.com".into();
        let err = h.saga.accept_incoming(K1, &different).await.unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiate_replay_after_guard_expiry_and_deletion() {
        let h = harness();
        h.saga.initiate(K1, &initiate_request()).await.unwrap();
        h.saga.confirm(&confirm(1)).await.unwrap();
        assert!(!h.citizens.contains("C1"));

        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        let replayed = h.saga.initiate(K1, &initiate_request()).await.unwrap();
        assert!(replayed.is_replay());
        assert_eq!(replayed.record().status, TransferStatus::Success);
        assert_eq!(h.peers.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_deletion_is_not_reported_to_peer() {
        let h = harness_with(|locks| -> Arc<dyn DistributedLock> {
            Arc::new(ExtendFailingLocks(locks))
        });
        h.saga.initiate(K1, &initiate_request()).await.unwrap();

        let message = h.saga.confirm(&confirm(1)).await.unwrap();
        assert!(message.contains("Hub unregister pending"));
        assert!(!h.citizens.contains("C1"));
        assert_eq!(h.hub.calls(), 0);

        let record = h.saga.store().get_by_idempotency_key(K1).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::PendingUnregister);
        assert!(record.error_message.unwrap().contains("connection reset"));

        // cached: the peer's retry sees the same answer, no second deletion
        let again = h.saga.confirm(&confirm(1)).await.unwrap();
        assert_eq!(again, message);
        assert_eq!(h.citizens.delete_count(), 1);
    }
}

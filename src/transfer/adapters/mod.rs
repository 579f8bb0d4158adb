//! Collaborator Adapters
//!
//! Narrow contracts the saga uses to reach everything outside its core:
//! local citizen data, documents, peer operators and operator alerts.
//! Local-data operations MUST be idempotent: the saga may repeat any of
//! them after a crash or a lost race.

pub mod alerts;
pub mod citizens;
pub mod documents;
pub mod peer;

pub use alerts::{TracingAlertSink, WebhookAlertSink};
pub use citizens::{MemoryCitizenDirectory, PgCitizenDirectory};
pub use documents::LocalDocumentService;
pub use peer::HttpPeerClient;

use async_trait::async_trait;
use serde::Serialize;

use super::error::TransferError;
use super::types::{CancelTransfer, ConfirmTransfer, DocumentRef, IncomingTransfer, TransferId};
use crate::resilience::CallOutcome;

/// Local citizen data as the saga needs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitizenProfile {
    pub citizen_id: String,
    pub name: String,
    pub email: String,
    pub document_ids: Vec<String>,
}

/// Authoritative local citizen records
#[async_trait]
pub trait CitizenDirectory: Send + Sync {
    async fn load_citizen(&self, citizen_id: &str)
    -> Result<Option<CitizenProfile>, TransferError>;

    /// Delete the citizen and all local documents.
    ///
    /// # Idempotency
    /// Deleting an absent citizen succeeds and returns `false`.
    async fn delete_citizen(&self, citizen_id: &str) -> Result<bool, TransferError>;

    /// Upsert a citizen received from a peer, with its document list
    async fn import_citizen(
        &self,
        profile: &CitizenProfile,
        documents: &[DocumentRef],
    ) -> Result<(), TransferError>;
}

/// Short-lived document access for peers, and intake of peer documents
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Issue one access reference per document, in order
    async fn issue_access_refs(
        &self,
        transfer_id: TransferId,
        citizen_id: &str,
        document_ids: &[String],
    ) -> Result<Vec<DocumentRef>, TransferError>;

    /// Revoke every reference issued for `transfer_id`. Returns how many.
    async fn discard_access_refs(&self, transfer_id: TransferId) -> Result<usize, TransferError>;

    /// Register documents offered by a source operator for `citizen_id`
    async fn import_documents(
        &self,
        citizen_id: &str,
        documents: &[DocumentRef],
    ) -> Result<(), TransferError>;
}

/// Outbound calls to other operators. Single attempt; the saga retries.
#[async_trait]
pub trait PeerOperatorClient: Send + Sync {
    async fn send_transfer(
        &self,
        base_url: &str,
        idempotency_key: &str,
        payload: &IncomingTransfer,
    ) -> CallOutcome<()>;

    async fn send_cancel(&self, base_url: &str, cancel: &CancelTransfer) -> CallOutcome<()>;

    async fn send_confirmation(&self, confirm_url: &str, confirm: &ConfirmTransfer)
    -> CallOutcome<()>;
}

/// Operator-visible alert about a transfer that needs a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub transfer_id: String,
    pub citizen_id: String,
    pub retry_count: i32,
    pub message: String,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn raise(&self, alert: &Alert);
}

/// Mock collaborators for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MockCitizenDirectory {
        citizens: Mutex<HashMap<String, CitizenProfile>>,
        imported: Mutex<Vec<(CitizenProfile, Vec<DocumentRef>)>>,
        delete_count: AtomicUsize,
        fail_delete: Mutex<bool>,
        fail_import: Mutex<bool>,
    }

    impl MockCitizenDirectory {
        pub fn new() -> Self {
            Self {
                citizens: Mutex::new(HashMap::new()),
                imported: Mutex::new(Vec::new()),
                delete_count: AtomicUsize::new(0),
                fail_delete: Mutex::new(false),
                fail_import: Mutex::new(false),
            }
        }

        pub fn with_citizen(self, citizen_id: &str) -> Self {
            self.citizens.lock().unwrap().insert(
                citizen_id.to_string(),
                CitizenProfile {
                    citizen_id: citizen_id.to_string(),
                    name: "Ada Lovelace".into(),
                    email: "ada@example.com".into(),
                    document_ids: vec!["doc-1".into(), "doc-2".into()],
                },
            );
            self
        }

        pub fn contains(&self, citizen_id: &str) -> bool {
            self.citizens.lock().unwrap().contains_key(citizen_id)
        }

        pub fn set_fail_delete(&self, fail: bool) {
            *self.fail_delete.lock().unwrap() = fail;
        }

        pub fn set_fail_import(&self, fail: bool) {
            *self.fail_import.lock().unwrap() = fail;
        }

        /// Deletions that actually removed data
        pub fn delete_count(&self) -> usize {
            self.delete_count.load(Ordering::SeqCst)
        }

        pub fn imported(&self) -> Vec<(CitizenProfile, Vec<DocumentRef>)> {
            self.imported.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CitizenDirectory for MockCitizenDirectory {
        async fn load_citizen(
            &self,
            citizen_id: &str,
        ) -> Result<Option<CitizenProfile>, TransferError> {
            Ok(self.citizens.lock().unwrap().get(citizen_id).cloned())
        }

        async fn delete_citizen(&self, citizen_id: &str) -> Result<bool, TransferError> {
            if *self.fail_delete.lock().unwrap() {
                return Err(TransferError::DatabaseError("Mock delete failure".into()));
            }
            let removed = self.citizens.lock().unwrap().remove(citizen_id).is_some();
            if removed {
                self.delete_count.fetch_add(1, Ordering::SeqCst);
            }
            Ok(removed)
        }

        async fn import_citizen(
            &self,
            profile: &CitizenProfile,
            documents: &[DocumentRef],
        ) -> Result<(), TransferError> {
            if *self.fail_import.lock().unwrap() {
                return Err(TransferError::DatabaseError("Mock import failure".into()));
            }
            self.citizens
                .lock()
                .unwrap()
                .insert(profile.citizen_id.clone(), profile.clone());
            self.imported
                .lock()
                .unwrap()
                .push((profile.clone(), documents.to_vec()));
            Ok(())
        }
    }

    pub struct MockDocumentService {
        issue_count: AtomicUsize,
        discard_count: AtomicUsize,
        fail_issue: Mutex<bool>,
    }

    impl MockDocumentService {
        pub fn new() -> Self {
            Self {
                issue_count: AtomicUsize::new(0),
                discard_count: AtomicUsize::new(0),
                fail_issue: Mutex::new(false),
            }
        }

        pub fn set_fail_issue(&self, fail: bool) {
            *self.fail_issue.lock().unwrap() = fail;
        }

        pub fn issue_count(&self) -> usize {
            self.issue_count.load(Ordering::SeqCst)
        }

        pub fn discard_count(&self) -> usize {
            self.discard_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentService for MockDocumentService {
        async fn issue_access_refs(
            &self,
            transfer_id: TransferId,
            _citizen_id: &str,
            document_ids: &[String],
        ) -> Result<Vec<DocumentRef>, TransferError> {
            self.issue_count.fetch_add(1, Ordering::SeqCst);
            if *self.fail_issue.lock().unwrap() {
                return Err(TransferError::DocumentError("Mock issue failure".into()));
            }
            Ok(document_ids
                .iter()
                .map(|id| DocumentRef {
                    document_id: id.clone(),
                    url: format!("https://op-a.example/documents/{}?ref={}", id, transfer_id),
                    expires_at: None,
                })
                .collect())
        }

        async fn discard_access_refs(
            &self,
            _transfer_id: TransferId,
        ) -> Result<usize, TransferError> {
            self.discard_count.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        async fn import_documents(
            &self,
            _citizen_id: &str,
            _documents: &[DocumentRef],
        ) -> Result<(), TransferError> {
            Ok(())
        }
    }

    /// Replays queued HTTP statuses for `send_transfer`; cancels and
    /// confirmations always succeed unless `confirm_status` says otherwise.
    pub struct MockPeerClient {
        transfer_script: Mutex<VecDeque<u16>>,
        confirm_status: Mutex<u16>,
        transfers: Mutex<Vec<(String, String, IncomingTransfer)>>,
        cancels: Mutex<Vec<CancelTransfer>>,
        confirmations: Mutex<Vec<(String, ConfirmTransfer)>>,
    }

    impl MockPeerClient {
        pub fn new() -> Self {
            Self {
                transfer_script: Mutex::new(VecDeque::new()),
                confirm_status: Mutex::new(200),
                transfers: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
                confirmations: Mutex::new(Vec::new()),
            }
        }

        pub fn push_transfer_statuses(&self, statuses: &[u16]) {
            self.transfer_script
                .lock()
                .unwrap()
                .extend(statuses.iter().copied());
        }

        pub fn set_confirm_status(&self, status: u16) {
            *self.confirm_status.lock().unwrap() = status;
        }

        pub fn transfers(&self) -> Vec<(String, String, IncomingTransfer)> {
            self.transfers.lock().unwrap().clone()
        }

        pub fn cancels(&self) -> Vec<CancelTransfer> {
            self.cancels.lock().unwrap().clone()
        }

        pub fn confirmations(&self) -> Vec<(String, ConfirmTransfer)> {
            self.confirmations.lock().unwrap().clone()
        }
    }

    fn peer_success(status: u16) -> bool {
        (200..300).contains(&status)
    }

    #[async_trait]
    impl PeerOperatorClient for MockPeerClient {
        async fn send_transfer(
            &self,
            base_url: &str,
            idempotency_key: &str,
            payload: &IncomingTransfer,
        ) -> CallOutcome<()> {
            self.transfers.lock().unwrap().push((
                base_url.to_string(),
                idempotency_key.to_string(),
                payload.clone(),
            ));
            let status = self.transfer_script.lock().unwrap().pop_front().unwrap_or(201);
            crate::resilience::classify_status(status, peer_success)
        }

        async fn send_cancel(&self, _base_url: &str, cancel: &CancelTransfer) -> CallOutcome<()> {
            self.cancels.lock().unwrap().push(cancel.clone());
            CallOutcome::Success(())
        }

        async fn send_confirmation(
            &self,
            confirm_url: &str,
            confirm: &ConfirmTransfer,
        ) -> CallOutcome<()> {
            self.confirmations
                .lock()
                .unwrap()
                .push((confirm_url.to_string(), confirm.clone()));
            let status = *self.confirm_status.lock().unwrap();
            crate::resilience::classify_status(status, peer_success)
        }
    }

    pub struct RecordingAlertSink {
        alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingAlertSink {
        pub fn new() -> Self {
            Self {
                alerts: Mutex::new(Vec::new()),
            }
        }

        pub fn alerts(&self) -> Vec<Alert> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingAlertSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn raise(&self, alert: &Alert) {
            self.alerts.lock().unwrap().push(alert.clone());
        }
    }
}

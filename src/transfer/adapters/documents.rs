//! Access-reference document service.
//!
//! Each issued reference is a random token appended to the document URL
//! and bound to one transfer, so a failed transfer can revoke exactly the
//! references it handed out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

use super::DocumentService;
use crate::transfer::error::TransferError;
use crate::transfer::types::{DocumentRef, TransferId};

#[derive(Debug, Clone)]
struct IssuedRef {
    citizen_id: String,
    document_id: String,
    expires_at: DateTime<Utc>,
}

pub struct LocalDocumentService {
    public_url: String,
    ttl: Duration,
    refs: DashMap<String, IssuedRef>,
    by_transfer: DashMap<TransferId, Vec<String>>,
    imported: DashMap<String, Vec<DocumentRef>>,
}

impl LocalDocumentService {
    pub fn new(public_url: &str, ttl: Duration) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            ttl,
            refs: DashMap::new(),
            by_transfer: DashMap::new(),
            imported: DashMap::new(),
        }
    }

    /// `(citizen_id, document_id)` behind a live reference token
    pub fn resolve(&self, token: &str) -> Option<(String, String)> {
        self.refs
            .get(token)
            .filter(|r| r.expires_at > Utc::now())
            .map(|r| (r.citizen_id.clone(), r.document_id.clone()))
    }

    /// Documents received from peers for `citizen_id`
    pub fn imported(&self, citizen_id: &str) -> Vec<DocumentRef> {
        self.imported
            .get(citizen_id)
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentService for LocalDocumentService {
    async fn issue_access_refs(
        &self,
        transfer_id: TransferId,
        citizen_id: &str,
        document_ids: &[String],
    ) -> Result<Vec<DocumentRef>, TransferError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| TransferError::DocumentError(format!("Invalid access ttl: {}", e)))?;
        let expires_at = Utc::now() + ttl;

        let mut issued = Vec::with_capacity(document_ids.len());
        let mut tokens = Vec::with_capacity(document_ids.len());
        for document_id in document_ids {
            let token = uuid::Uuid::new_v4().simple().to_string();
            self.refs.insert(
                token.clone(),
                IssuedRef {
                    citizen_id: citizen_id.to_string(),
                    document_id: document_id.clone(),
                    expires_at,
                },
            );
            issued.push(DocumentRef {
                document_id: document_id.clone(),
                url: format!("{}/documents/{}?ref={}", self.public_url, document_id, token),
                expires_at: Some(expires_at),
            });
            tokens.push(token);
        }

        self.by_transfer.entry(transfer_id).or_default().extend(tokens);
        debug!(transfer_id = %transfer_id, citizen_id, count = issued.len(), "Issued document access refs");
        Ok(issued)
    }

    async fn discard_access_refs(&self, transfer_id: TransferId) -> Result<usize, TransferError> {
        let Some((_, tokens)) = self.by_transfer.remove(&transfer_id) else {
            return Ok(0);
        };
        let discarded = tokens
            .iter()
            .filter(|t| self.refs.remove(t.as_str()).is_some())
            .count();
        debug!(transfer_id = %transfer_id, discarded, "Discarded document access refs");
        Ok(discarded)
    }

    async fn import_documents(
        &self,
        citizen_id: &str,
        documents: &[DocumentRef],
    ) -> Result<(), TransferError> {
        if let Some(bad) = documents.iter().find(|d| d.url.is_empty()) {
            return Err(TransferError::DocumentError(format!(
                "Document {} has no access url",
                bad.document_id
            )));
        }
        self.imported
            .insert(citizen_id.to_string(), documents.to_vec());
        Ok(())
    }
}

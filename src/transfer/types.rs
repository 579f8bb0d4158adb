//! Transfer Core Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use validator::Validate;

use super::state::TransferStatus;

/// ULID transfer identifier: sortable, no coordination needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Which side of the transfer this operator is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Direction {
    /// We are the source: our citizen leaves
    Outgoing = 1,
    /// We are the destination: a citizen arrives
    Incoming = 2,
}

impl Direction {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Direction::Outgoing),
            2 => Some(Direction::Incoming),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// This operator's identity as sent to peers and the Hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorIdentity {
    pub id: String,
    pub name: String,
}

/// Short-lived access reference to one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DocumentRef {
    #[schema(example = "doc-001")]
    pub document_id: String,
    #[schema(example = "https://operator-a.example/documents/doc-001?ref=3f1c")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// `POST /transferCitizen` body: a peer hands a citizen over to us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct IncomingTransfer {
    #[validate(length(min = 1, max = 128))]
    #[serde(alias = "id")]
    #[schema(example = "C1")]
    pub citizen_id: String,
    #[validate(length(min = 1, max = 256))]
    pub citizen_name: String,
    #[validate(email)]
    pub citizen_email: String,
    #[validate(length(min = 1, max = 128))]
    pub source_operator_id: String,
    #[serde(default)]
    pub source_operator_name: String,
    #[validate(length(min = 1, max = 128))]
    pub destination_operator_id: String,
    #[serde(default)]
    pub destination_operator_name: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub documents: Vec<DocumentRef>,
    /// Where the destination posts its confirmation
    #[validate(url)]
    pub confirm_url: String,
}

/// `POST /transfers` body: start moving one of our citizens to a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct InitiateTransfer {
    #[validate(length(min = 1, max = 128))]
    pub citizen_id: String,
    #[validate(length(min = 1, max = 128))]
    pub destination_operator_id: String,
    #[serde(default)]
    pub destination_operator_name: String,
    /// Base URL of the destination operator's transfer API
    #[validate(url)]
    pub destination_url: String,
}

/// `POST /transferCitizenConfirm` body, sent by the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ConfirmTransfer {
    #[validate(length(min = 1, max = 128))]
    #[serde(alias = "id")]
    pub citizen_id: String,
    /// 1 = received, 0 = rejected
    #[validate(range(min = 0, max = 1))]
    pub req_status: u8,
    /// Idempotency key of the original outgoing transfer
    #[validate(length(min = 1, max = 128))]
    pub token: String,
}

/// `POST /transferCitizenCancel` body, best-effort notice from the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CancelTransfer {
    #[validate(length(min = 1, max = 128))]
    pub citizen_id: String,
    #[validate(length(min = 1, max = 128))]
    pub token: String,
    #[serde(default)]
    pub reason: String,
}

/// Transfer record, one per idempotency key
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: TransferId,
    pub citizen_id: String,
    pub citizen_name: String,
    pub citizen_email: String,
    pub direction: Direction,
    pub source_operator_id: String,
    pub source_operator_name: String,
    pub destination_operator_id: String,
    pub destination_operator_name: String,
    pub idempotency_key: String,
    /// Outgoing only: destination operator's API base URL
    pub destination_url: Option<String>,
    /// Incoming only: source operator's confirmation callback
    pub confirm_url: Option<String>,
    pub status: TransferStatus,
    /// Document ids in transfer order
    pub document_refs: Vec<String>,
    /// Incoming only: access URLs received, aligned with `document_refs`
    pub document_urls: Vec<String>,
    /// Failed Hub unregister attempts
    pub retry_count: i32,
    pub requested_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub unregistered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// New outgoing record in PENDING
    pub fn outgoing(
        idempotency_key: &str,
        req: &InitiateTransfer,
        citizen_name: &str,
        citizen_email: &str,
        document_ids: Vec<String>,
        us: &OperatorIdentity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            citizen_id: req.citizen_id.clone(),
            citizen_name: citizen_name.to_string(),
            citizen_email: citizen_email.to_string(),
            direction: Direction::Outgoing,
            source_operator_id: us.id.clone(),
            source_operator_name: us.name.clone(),
            destination_operator_id: req.destination_operator_id.clone(),
            destination_operator_name: req.destination_operator_name.clone(),
            idempotency_key: idempotency_key.to_string(),
            destination_url: Some(req.destination_url.clone()),
            confirm_url: None,
            status: TransferStatus::Pending,
            document_refs: document_ids,
            document_urls: Vec::new(),
            retry_count: 0,
            requested_at: now,
            confirmed_at: None,
            unregistered_at: None,
            completed_at: None,
            error_message: None,
            updated_at: now,
        }
    }

    /// New incoming record in PENDING
    pub fn incoming(idempotency_key: &str, req: &IncomingTransfer) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            citizen_id: req.citizen_id.clone(),
            citizen_name: req.citizen_name.clone(),
            citizen_email: req.citizen_email.clone(),
            direction: Direction::Incoming,
            source_operator_id: req.source_operator_id.clone(),
            source_operator_name: req.source_operator_name.clone(),
            destination_operator_id: req.destination_operator_id.clone(),
            destination_operator_name: req.destination_operator_name.clone(),
            idempotency_key: idempotency_key.to_string(),
            destination_url: None,
            confirm_url: Some(req.confirm_url.clone()),
            status: TransferStatus::Pending,
            document_refs: req.documents.iter().map(|d| d.document_id.clone()).collect(),
            document_urls: req.documents.iter().map(|d| d.url.clone()).collect(),
            retry_count: 0,
            requested_at: now,
            confirmed_at: None,
            unregistered_at: None,
            completed_at: None,
            error_message: None,
            updated_at: now,
        }
    }

    /// Same logical request as the one that created this record.
    /// Access URLs are not compared: a source may re-sign them on retry.
    pub fn matches_incoming(&self, req: &IncomingTransfer) -> bool {
        self.direction == Direction::Incoming
            && self.citizen_id == req.citizen_id
            && self.citizen_name == req.citizen_name
            && self.citizen_email == req.citizen_email
            && self.source_operator_id == req.source_operator_id
            && self.destination_operator_id == req.destination_operator_id
            && self.confirm_url.as_deref() == Some(req.confirm_url.as_str())
            && self
                .document_refs
                .iter()
                .eq(req.documents.iter().map(|d| &d.document_id))
    }

    pub fn matches_initiate(&self, req: &InitiateTransfer) -> bool {
        self.direction == Direction::Outgoing
            && self.citizen_id == req.citizen_id
            && self.destination_operator_id == req.destination_operator_id
            && self.destination_url.as_deref() == Some(req.destination_url.as_str())
    }

    /// Access refs of an incoming record, rebuilt for import
    pub fn incoming_documents(&self) -> Vec<DocumentRef> {
        self.document_refs
            .iter()
            .zip(self.document_urls.iter())
            .map(|(id, url)| DocumentRef {
                document_id: id.clone(),
                url: url.clone(),
                expires_at: None,
            })
            .collect()
    }

    /// Payload sent to the destination for an outgoing record
    pub fn to_payload(&self, documents: Vec<DocumentRef>, confirm_url: &str) -> IncomingTransfer {
        IncomingTransfer {
            citizen_id: self.citizen_id.clone(),
            citizen_name: self.citizen_name.clone(),
            citizen_email: self.citizen_email.clone(),
            source_operator_id: self.source_operator_id.clone(),
            source_operator_name: self.source_operator_name.clone(),
            destination_operator_id: self.destination_operator_id.clone(),
            destination_operator_name: self.destination_operator_name.clone(),
            documents,
            confirm_url: confirm_url.to_string(),
        }
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] {} citizen={} {} -> {} status={} retries={}",
            self.id,
            self.direction,
            self.citizen_id,
            self.source_operator_id,
            self.destination_operator_id,
            self.status,
            self.retry_count
        )
    }
}

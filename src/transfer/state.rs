//! Transfer status state machine.
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use std::fmt;

/// Transfer status
///
/// ```text
/// PENDING ──► CONFIRMED ──► PENDING_UNREGISTER ──► SUCCESS
///    │            │
///    └────────────┴──► FAILED        (only before local deletion)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i16)]
pub enum TransferStatus {
    /// Record created, waiting for the destination's confirmation
    Pending = 0,

    /// Destination confirmed receipt. Local deletion may now run.
    Confirmed = 10,

    /// Local data deleted, Hub not yet told.
    /// Past the point of no return: can only move forward to SUCCESS.
    PendingUnregister = 20,

    /// Terminal: deleted locally and unregistered at the Hub
    Success = 30,

    /// Terminal: aborted before any local deletion
    Failed = -10,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 5] = [
        TransferStatus::Pending,
        TransferStatus::Confirmed,
        TransferStatus::PendingUnregister,
        TransferStatus::Success,
        TransferStatus::Failed,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Success | TransferStatus::Failed)
    }

    /// Local data of the citizen is already gone
    #[inline]
    pub fn is_past_deletion(&self) -> bool {
        matches!(
            self,
            TransferStatus::PendingUnregister | TransferStatus::Success
        )
    }

    /// Allowed single-step transitions
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Failed)
                | (Confirmed, PendingUnregister)
                | (Confirmed, Failed)
                | (PendingUnregister, Success)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Pending),
            10 => Some(TransferStatus::Confirmed),
            20 => Some(TransferStatus::PendingUnregister),
            30 => Some(TransferStatus::Success),
            -10 => Some(TransferStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Confirmed => "CONFIRMED",
            TransferStatus::PendingUnregister => "PENDING_UNREGISTER",
            TransferStatus::Success => "SUCCESS",
            TransferStatus::Failed => "FAILED",
        }
    }

    /// Lowercase form used in API payloads (`"pending"`)
    pub fn as_api_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::PendingUnregister => "pending_unregister",
            TransferStatus::Success => "success",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}

//! Custody Transfer Saga
//!
//! Moves custody of a citizen between two operators without ever losing the
//! citizen, double-deleting under retries, or flooding the shared Hub.
//!
//! # State Machine
//!
//! ```text
//! PENDING → CONFIRMED → PENDING_UNREGISTER → SUCCESS
//!    ↓          ↓
//!  FAILED ◄─────┘          (never after local deletion)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: the record exists before any remote call
//! 2. **Delete iff Confirmed**: local data is deleted only after the destination confirmed
//! 3. **Unregister iff Deleted**: the Hub is told only after local deletion succeeded
//! 4. **Forward Only After Deletion**: PENDING_UNREGISTER is retried, never failed

pub mod adapters;
pub mod error;
pub mod saga;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod types;


// Re-exports for convenience
pub use error::TransferError;
pub use saga::{SagaOptions, SagaOrchestrator, SagaResult, SagaServices, validate_idempotency_key};
pub use state::TransferStatus;
pub use store::{MemoryTransferStore, PgTransferStore, RetryBudget, TransferStore};
pub use sweeper::{ReconciliationSweeper, SweepReport, SweeperHandle, SweeperSettings};
pub use types::{
    CancelTransfer, ConfirmTransfer, Direction, DocumentRef, IncomingTransfer, InitiateTransfer,
    OperatorIdentity, TransferId, TransferRecord,
};

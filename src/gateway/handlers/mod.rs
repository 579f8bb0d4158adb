//! Gateway HTTP handlers
//!
//! - [`transfer`]: peer callbacks (`/transferCitizen*`), local initiation and lookup
//! - [`health`]: liveness and metrics

pub mod health;
pub mod transfer;

pub use health::{HealthResponse, get_metrics, health_check};
pub use transfer::{
    cancel_transfer, confirm_transfer, create_transfer, get_document, get_transfer,
    transfer_citizen,
};

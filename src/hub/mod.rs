//! Hub access.
//!
//! The Hub is the shared public registry of which operator holds each
//! citizen. It is an opaque remote party: the only call the saga makes is
//! the unregister after local deletion. Every call goes through
//! [`ResilientHub`], never to a [`HubClient`] directly.

pub mod http;
pub mod resilient;

pub use http::HttpHubClient;
pub use resilient::{HubCallReport, HubOutcome, ResilientHub};

use async_trait::async_trait;
use serde::Serialize;

use crate::resilience::CallOutcome;

/// Logical endpoint name used for rate limiting and the circuit breaker
pub const UNREGISTER_ENDPOINT: &str = "hub.unregister_citizen";

/// Body of `DELETE /apis/unregisterCitizen`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterCitizen {
    pub id: String,
    pub operator_id: String,
    pub operator_name: String,
}

#[async_trait]
pub trait HubClient: Send + Sync {
    /// Single network attempt, no retries
    async fn unregister_citizen(&self, req: &UnregisterCitizen) -> CallOutcome<()>;
}

/// Scripted Hub for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays queued HTTP statuses, then falls back to `default_status`
    pub struct ScriptedHub {
        script: Mutex<VecDeque<u16>>,
        default_status: Mutex<u16>,
        calls: AtomicUsize,
        requests: Mutex<Vec<UnregisterCitizen>>,
    }

    impl ScriptedHub {
        pub fn new(default_status: u16) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default_status: Mutex::new(default_status),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn push_statuses(&self, statuses: &[u16]) {
            self.script.lock().unwrap().extend(statuses.iter().copied());
        }

        pub fn set_default_status(&self, status: u16) {
            *self.default_status.lock().unwrap() = status;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<UnregisterCitizen> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HubClient for ScriptedHub {
        async fn unregister_citizen(&self, req: &UnregisterCitizen) -> CallOutcome<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(req.clone());
            let status = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(*self.default_status.lock().unwrap());
            crate::resilience::classify_status(status, super::http::is_hub_success)
        }
    }
}

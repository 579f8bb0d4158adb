use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{HubClient, UnregisterCitizen};
use crate::resilience::{CallOutcome, classify_status, classify_transport_error};

/// Only these statuses confirm the unregister
pub fn is_hub_success(status: u16) -> bool {
    matches!(status, 200 | 201 | 204)
}

/// `reqwest`-backed Hub client
pub struct HttpHubClient {
    client: reqwest::Client,
    unregister_url: String,
}

impl HttpHubClient {
    pub fn new(base_url: &str, unregister_path: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            unregister_url: join_url(base_url, unregister_path),
        })
    }

    pub fn unregister_url(&self) -> &str {
        &self.unregister_url
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn unregister_citizen(&self, req: &UnregisterCitizen) -> CallOutcome<()> {
        let response = self
            .client
            .delete(&self.unregister_url)
            .json(req)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                debug!(citizen_id = %req.id, status, "Hub unregister responded");
                classify_status(status, is_hub_success)
            }
            Err(e) => classify_transport_error(&e),
        }
    }
}

//! HTTP client for other operators' transfer APIs.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::PeerOperatorClient;
use crate::hub::http::join_url;
use crate::resilience::{CallOutcome, classify_status, classify_transport_error};
use crate::transfer::types::{CancelTransfer, ConfirmTransfer, IncomingTransfer};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

fn is_peer_success(status: u16) -> bool {
    (200..300).contains(&status)
}

pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        url: &str,
        idempotency_key: Option<&str>,
        body: &B,
    ) -> CallOutcome<()> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }

        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                debug!(url, status, "Peer operator responded");
                classify_status(status, is_peer_success)
            }
            Err(e) => classify_transport_error(&e),
        }
    }
}

#[async_trait]
impl PeerOperatorClient for HttpPeerClient {
    async fn send_transfer(
        &self,
        base_url: &str,
        idempotency_key: &str,
        payload: &IncomingTransfer,
    ) -> CallOutcome<()> {
        let url = join_url(base_url, "/transferCitizen");
        self.post(&url, Some(idempotency_key), payload).await
    }

    async fn send_cancel(&self, base_url: &str, cancel: &CancelTransfer) -> CallOutcome<()> {
        let url = join_url(base_url, "/transferCitizenCancel");
        self.post(&url, None, cancel).await
    }

    async fn send_confirmation(
        &self,
        confirm_url: &str,
        confirm: &ConfirmTransfer,
    ) -> CallOutcome<()> {
        self.post(confirm_url, None, confirm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_2xx_is_success() {
        assert!(is_peer_success(200));
        assert!(is_peer_success(201));
        assert!(is_peer_success(202));
        assert!(!is_peer_success(409));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_retryable() {
        let client = HttpPeerClient::new(Duration::from_millis(500)).unwrap();
        let confirm = ConfirmTransfer {
            citizen_id: "C1".into(),
            req_status: 1,
            token: "K1".into(),
        };
        let outcome = client
            .send_confirmation("http://127.0.0.1:9/transferCitizenConfirm", &confirm)
            .await;
        assert!(outcome.is_retryable());
    }
}

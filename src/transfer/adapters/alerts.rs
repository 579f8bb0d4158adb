//! Alert sinks for transfers stuck past the retry budget.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, warn};

use super::{Alert, AlertSink};

/// Logs the alert at ERROR level
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn raise(&self, alert: &Alert) {
        error!(
            transfer_id = %alert.transfer_id,
            citizen_id = %alert.citizen_id,
            retry_count = alert.retry_count,
            "[ALERT] {}",
            alert.message
        );
    }
}

/// Posts the alert as JSON to a webhook. Delivery failures are logged,
/// never propagated.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn raise(&self, alert: &Alert) {
        TracingAlertSink.raise(alert).await;

        match self.client.post(&self.url).json(alert).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(
                transfer_id = %alert.transfer_id,
                status = resp.status().as_u16(),
                "Alert webhook rejected alert"
            ),
            Err(e) => warn!(transfer_id = %alert.transfer_id, error = %e, "Alert webhook unreachable"),
        }
    }
}

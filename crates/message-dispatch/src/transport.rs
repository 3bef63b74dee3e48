//! Outbound webhook transport.

use crate::error::{DispatchError, DispatchResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// JSON body POSTed to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub to: String,
    pub content: String,
}

/// Delivers one payload. Any failure is a `Delivery` error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, payload: &WebhookPayload) -> DispatchResult<()>;
}

/// reqwest-based webhook client.
pub struct WebhookClient {
    client: Client,
    url: String,
}

impl WebhookClient {
    /// Create a client with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> DispatchResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| DispatchError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebhookClient {
    async fn deliver(&self, payload: &WebhookPayload) -> DispatchResult<()> {
        debug!(url = %self.url, to = %payload.to, "Posting webhook");

        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Delivery(format!("error sending request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Delivery(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }

        Ok(())
    }
}

//! Webhook callbacks for schedules configured with `transport = "callback"`.

use std::time::Duration;

use async_trait::async_trait;

use relay_core::error::{RelayError, Result};
use relay_core::traits::CallbackClient;
use relay_core::types::CallbackPayload;

/// Posts [`CallbackPayload`] JSON with reqwest.
pub struct HttpCallbackClient {
    client: reqwest::Client,
}

impl HttpCallbackClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dutyrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackClient for HttpCallbackClient {
    async fn post(&self, url: &str, payload: &CallbackPayload) -> Result<()> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| RelayError::transport(format!("callback {url}: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("🔗 Callback delivered: {}", payload.title);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(RelayError::transport(format!("callback {url} returned {status}: {body}")))
        }
    }
}

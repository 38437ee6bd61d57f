//! Push transports: phone call, SMS and chat message.
//!
//! - `LogTransport` only writes the delivery to the log (dry-run).
//! - `RestTransport` posts each delivery as JSON to a provider gateway at
//!   `{base_url}/{call|sms|slack}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use relay_core::config::TransportConfig;
use relay_core::error::{RelayError, Result};
use relay_core::traits::Transport;
use relay_core::types::Identity;

/// Build the transport named in config.
pub fn from_config(config: &TransportConfig, timeout: Duration) -> Result<std::sync::Arc<dyn Transport>> {
    match config.kind.as_str() {
        "log" => Ok(std::sync::Arc::new(LogTransport)),
        "rest" => Ok(std::sync::Arc::new(RestTransport::new(
            &config.base_url,
            &config.token,
            timeout,
        )?)),
        other => Err(RelayError::config(format!("unknown transport kind '{other}'"))),
    }
}

/// Dry-run transport.
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn call_phone(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()> {
        tracing::info!(
            "📞 [dry-run] call {} ({}) [{correlation_id}]: {text}",
            identity.email,
            identity.verified_phone().unwrap_or("-")
        );
        Ok(())
    }

    async fn send_sms(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()> {
        tracing::info!(
            "💬 [dry-run] sms {} ({}) [{correlation_id}]: {text}",
            identity.email,
            identity.verified_phone().unwrap_or("-")
        );
        Ok(())
    }

    async fn message_slack(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()> {
        tracing::info!(
            "💼 [dry-run] slack {} ({}) [{correlation_id}]: {text}",
            identity.email,
            identity.slack_user_id.as_deref().unwrap_or(&identity.id)
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct RestDelivery<'a> {
    user_id: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slack_user_id: Option<&'a str>,
    correlation_id: &'a str,
    text: &'a str,
}

/// Provider gateway reached over HTTP.
pub struct RestTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestTransport {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        if base_url.is_empty() {
            return Err(RelayError::config("transport.base_url is required for the rest transport"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dutyrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post(&self, action: &str, identity: &Identity, correlation_id: &str, text: &str) -> Result<()> {
        let body = RestDelivery {
            user_id: &identity.id,
            email: &identity.email,
            phone_number: identity.verified_phone(),
            slack_user_id: identity.slack_user_id.as_deref(),
            correlation_id,
            text,
        };
        let mut req = self
            .client
            .post(format!("{}/{action}", self.base_url))
            .json(&body);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::transport(format!("{action} to {}: {e}", identity.email)))?;

        if resp.status().is_success() {
            tracing::debug!("✅ {action} delivered to {} [{correlation_id}]", identity.email);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(RelayError::transport(format!("{action} provider error {status}: {body}")))
        }
    }

    fn require_phone<'a>(identity: &'a Identity) -> Result<&'a str> {
        identity
            .verified_phone()
            .ok_or_else(|| RelayError::PhoneNotVerified(identity.email.clone()))
    }
}

#[async_trait]
impl Transport for RestTransport {
    fn name(&self) -> &str {
        "rest"
    }

    async fn call_phone(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()> {
        Self::require_phone(identity)?;
        self.post("call", identity, correlation_id, text).await
    }

    async fn send_sms(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()> {
        Self::require_phone(identity)?;
        self.post("sms", identity, correlation_id, text).await
    }

    async fn message_slack(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()> {
        self.post("slack", identity, correlation_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::Channel;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bob() -> Identity {
        Identity::new("U2", "bob@example.com").with_phone("+15550002", true)
    }

    #[tokio::test]
    async fn test_rest_sms_posts_json_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sms"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(serde_json::json!({
                "phone_number": "+15550002",
                "correlation_id": "ev-1",
                "text": "you are on call"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = RestTransport::new(&server.uri(), "s3cret", Duration::from_secs(2)).unwrap();
        transport
            .deliver(Channel::Sms, &bob(), "ev-1", "you are on call")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rest_provider_error_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let transport = RestTransport::new(&server.uri(), "", Duration::from_secs(2)).unwrap();
        let err = transport.call_phone(&bob(), "ev-2", "wake up").await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(ref m) if m.contains("502")));
    }

    #[tokio::test]
    async fn test_rest_refuses_unverified_phone() {
        let transport = RestTransport::new("http://127.0.0.1:9", "", Duration::from_secs(1)).unwrap();
        let unverified = Identity::new("U3", "c@example.com").with_phone("+1", false);
        let err = transport.send_sms(&unverified, "ev-3", "hi").await.unwrap_err();
        assert!(matches!(err, RelayError::PhoneNotVerified(_)));
    }

    #[test]
    fn test_from_config() {
        let mut cfg = TransportConfig::default();
        assert_eq!(from_config(&cfg, Duration::from_secs(1)).unwrap().name(), "log");
        cfg.kind = "rest".into();
        assert!(from_config(&cfg, Duration::from_secs(1)).is_err());
        cfg.base_url = "http://provider.local".into();
        assert_eq!(from_config(&cfg, Duration::from_secs(1)).unwrap().name(), "rest");
        cfg.kind = "pigeon".into();
        assert!(from_config(&cfg, Duration::from_secs(1)).is_err());
    }
}

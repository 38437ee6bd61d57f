//! Outbound delivery capabilities.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CallbackPayload, Channel, Identity};

/// Phone / SMS / chat delivery for a resolved recipient.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn call_phone(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()>;

    async fn send_sms(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()>;

    async fn message_slack(&self, identity: &Identity, correlation_id: &str, text: &str) -> Result<()>;

    /// Route to the capability matching `channel`.
    async fn deliver(
        &self,
        channel: Channel,
        identity: &Identity,
        correlation_id: &str,
        text: &str,
    ) -> Result<()> {
        match channel {
            Channel::Phone => self.call_phone(identity, correlation_id, text).await,
            Channel::Sms => self.send_sms(identity, correlation_id, text).await,
            Channel::Slack => self.message_slack(identity, correlation_id, text).await,
        }
    }
}

/// Posts formatted payloads to schedule callback URLs.
#[async_trait]
pub trait CallbackClient: Send + Sync {
    async fn post(&self, url: &str, payload: &CallbackPayload) -> Result<()>;
}

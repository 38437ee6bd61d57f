//! Notification events flowing from the poller and the inbound path to the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::{Identity, IdentityKey};

/// Per-schedule transport selection, as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Sms,
    Phone,
    Slack,
    Callback,
}

impl TransportKind {
    /// Push channel for this transport, `None` for webhook callbacks.
    pub fn push_channel(&self) -> Option<Channel> {
        match self {
            Self::Sms => Some(Channel::Sms),
            Self::Phone => Some(Channel::Phone),
            Self::Slack => Some(Channel::Slack),
            Self::Callback => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sms => write!(f, "sms"),
            Self::Phone => write!(f, "phone"),
            Self::Slack => write!(f, "slack"),
            Self::Callback => write!(f, "callback"),
        }
    }
}

/// Push delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Phone,
    Sms,
    Slack,
}

impl Channel {
    /// Whether the channel needs a verified phone number.
    pub fn needs_phone(&self) -> bool {
        matches!(self, Self::Phone | Self::Sms)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phone => write!(f, "phone"),
            Self::Sms => write!(f, "sms"),
            Self::Slack => write!(f, "slack"),
        }
    }
}

/// Who a push event is for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Recipient {
    /// Resolved by the dispatcher through the identity resolver.
    Lookup(IdentityKey),
    /// Already resolved by the caller (inbound notify path).
    Resolved(Box<Identity>),
}

impl Recipient {
    pub fn user_id(id: &str) -> Self {
        Self::Lookup(IdentityKey::UserId(id.to_string()))
    }

    pub fn email(email: &str) -> Self {
        Self::Lookup(IdentityKey::Email(email.to_string()))
    }
}

/// How an event reaches its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Delivery {
    Push { recipient: Recipient, channel: Channel },
    Callback { url: String },
}

/// Direction of a duty transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Started,
    Ended,
}

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventOrigin {
    Roster {
        schedule: String,
        member: String,
        transition: TransitionKind,
    },
    Inbound,
}

/// A single notification, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Correlation id, passed to transports and logged with the outcome.
    pub id: String,
    pub delivery: Delivery,
    pub title: String,
    pub message: String,
    pub origin: EventOrigin,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn push(recipient: Recipient, channel: Channel, title: &str, message: &str) -> Self {
        Self::build(Delivery::Push { recipient, channel }, title, message)
    }

    pub fn callback(url: &str, title: &str, message: &str) -> Self {
        Self::build(Delivery::Callback { url: url.to_string() }, title, message)
    }

    fn build(delivery: Delivery, title: &str, message: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            delivery,
            title: title.to_string(),
            message: message.to_string(),
            origin: EventOrigin::Inbound,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Channel label used for audit records and logs.
    pub fn channel_label(&self) -> String {
        match &self.delivery {
            Delivery::Push { channel, .. } => channel.to_string(),
            Delivery::Callback { .. } => TransportKind::Callback.to_string(),
        }
    }
}

/// Body posted to a schedule's callback URL (formatted-webhook shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_uid: Option<String>,
    pub title: String,
    pub message: String,
    pub state: String,
    pub link_to_upstream_details: String,
}

impl CallbackPayload {
    pub fn from_event(event: &NotificationEvent) -> Self {
        Self {
            alert_uid: Some(event.id.clone()),
            title: event.title.clone(),
            message: event.message.clone(),
            state: "alerting".into(),
            link_to_upstream_details: String::new(),
        }
    }
}

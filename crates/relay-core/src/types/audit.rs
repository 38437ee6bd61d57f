//! Delivery audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored message text is capped to this many characters.
pub const MAX_AUDIT_MESSAGE_CHARS: usize = 500;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    /// Phone number, chat handle or callback URL.
    pub recipient: String,
    pub channel: String,
    pub success: bool,
    pub message: String,
}

impl AuditRecord {
    pub fn new(user_id: &str, recipient: &str, channel: &str, success: bool, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            recipient: recipient.to_string(),
            channel: channel.to_string(),
            success,
            message: truncate_chars(message, MAX_AUDIT_MESSAGE_CHARS),
        }
    }
}

/// Truncate on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_truncated() {
        let long = "x".repeat(MAX_AUDIT_MESSAGE_CHARS + 20);
        let rec = AuditRecord::new("U1", "+100", "sms", true, &long);
        assert_eq!(rec.message.chars().count(), MAX_AUDIT_MESSAGE_CHARS);
    }

    #[test]
    fn test_truncate_multibyte() {
        let cyrillic = "дежурство".repeat(100);
        let rec = AuditRecord::new("U1", "+100", "sms", false, &cyrillic);
        assert_eq!(rec.message.chars().count(), MAX_AUDIT_MESSAGE_CHARS);
        assert!(!rec.success);
    }

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(truncate_chars("Sent", 500), "Sent");
    }
}
